//! Interactive chat terminal: stdin lines become broadcasts, mesh messages
//! are printed as `[local] [sender] payload` followed by a fresh prompt.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mesh_core::{ChatMessage, PeerIdentity};
use mesh_services::ChatChannels;

pub fn prompt(local: &str) -> String {
    format!("[{local}] ")
}

pub fn render(local: &str, msg: &ChatMessage) -> String {
    format!("\n[{local}] [{}] {}\n{}", msg.sender_name, msg.payload, prompt(local))
}

/// Run until `shutdown` fires. Closing stdin stops input only; messages from
/// the mesh keep printing.
pub async fn run(identity: PeerIdentity, chat: ChatChannels, shutdown: CancellationToken) {
    let ChatChannels { inbound, outbound } = chat;
    let mut stdout = tokio::io::stdout();
    show_prompt(&mut stdout, &identity.name).await;

    let input = {
        let identity = identity.clone();
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = read_input(stdin, &identity, &outbound, tokio::io::stdout()).await {
                tracing::warn!(error = %e, "terminal input failed");
            }
            tracing::debug!("terminal input closed");
        })
    };

    tokio::select! {
        _ = shutdown.cancelled() => {}
        result = write_output(stdout, &identity.name, inbound) => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "terminal output failed");
            }
        }
    }
    input.abort();
}

/// Turn each non-blank line into a chat message on `outbound`.
pub async fn read_input<R, W>(
    reader: R,
    identity: &PeerIdentity,
    outbound: &mpsc::Sender<ChatMessage>,
    mut echo: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            let msg = ChatMessage::new(identity, line);
            if outbound.send(msg).await.is_err() {
                break;
            }
        }
        write_flush(&mut echo, &prompt(&identity.name)).await?;
    }
    Ok(())
}

/// Print every message from the mesh until the node drops its sender.
pub async fn write_output<W>(
    mut out: W,
    local: &str,
    mut inbound: mpsc::Receiver<ChatMessage>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = inbound.recv().await {
        write_flush(&mut out, &render(local, &msg)).await?;
    }
    Ok(())
}

/// Print the prompt. A failed write is logged; input keeps working.
async fn show_prompt<W: AsyncWrite + Unpin>(out: &mut W, local: &str) -> bool {
    match write_flush(out, &prompt(local)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "terminal prompt failed");
            false
        }
    }
}

async fn write_flush<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await
}
