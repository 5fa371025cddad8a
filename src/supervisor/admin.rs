//! Administrative socket server.
//!
//! One request frame per connection, one reply frame, then close. The socket
//! lives in the 0700 socket directory, so reaching it at all is the access
//! check.

use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};

use super::command::SupervisorHandle;
use crate::control::{Message, read_frame, write_message};
use crate::error::{Result, WarmpoolError};

/// How long a client may take to send its request.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept admin connections until the task is aborted.
pub async fn serve(listener: UnixListener, handle: SupervisorHandle) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept admin connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, handle).await {
                tracing::debug!(error = %e, "Admin connection failed");
            }
        });
    }
}

async fn handle_connection(mut stream: UnixStream, handle: SupervisorHandle) -> Result<()> {
    let frame = match tokio::time::timeout(READ_TIMEOUT, read_frame(&mut stream)).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => {
            let reason = format!("unreadable request: {}", e);
            write_message(&mut stream, Message::Rejected { reason }).await?;
            return Ok(());
        }
        Err(_) => return Err(WarmpoolError::Timeout("admin request".into())),
    };

    let kind = frame.message.kind();
    tracing::debug!(kind, "Admin request");
    let reply = answer(frame.message, &handle).await;
    if let Message::Rejected { ref reason } = reply {
        tracing::info!(kind, reason = %reason, "Rejected admin request");
    }
    write_message(&mut stream, reply).await?;
    Ok(())
}

async fn answer(request: Message, handle: &SupervisorHandle) -> Message {
    match request {
        Message::StatusRequest { filter } => match handle.status(filter).await {
            Ok(report) => Message::StatusReply(report),
            Err(e) => rejected(e),
        },
        Message::ReloadRequest => match handle.reload().await {
            Ok(()) => accepted("reload"),
            Err(e) => rejected(e),
        },
        Message::StopRequest => match handle.stop().await {
            Ok(()) => accepted("stop"),
            Err(e) => rejected(e),
        },
        other => Message::Rejected {
            reason: format!("{} is not an admin request", other.kind()),
        },
    }
}

fn accepted(action: &str) -> Message {
    Message::Accepted {
        action: action.to_string(),
    }
}

fn rejected(error: WarmpoolError) -> Message {
    Message::Rejected {
        reason: error.to_string(),
    }
}
