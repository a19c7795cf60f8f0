use tokio::sync::watch;

use super::Client;
use crate::ws::message::MessageStream;

tokio::task_local! {
    static CONNECTION: u64;
}

/// id of the connection whose listener task is running the caller, if any
pub(super) fn current() -> Option<u64> {
    CONNECTION.try_with(|id| *id).ok()
}

/// Read loop of one connection.
///
/// Returns the stream when stopped through `listening`, so the closer can
/// wait the peer close frame on it. Returns `None` after a read failure,
/// which is reported to [Client::fail_connection].
pub(super) async fn run(
    client: Client,
    id: u64,
    stream: MessageStream,
    listening: watch::Receiver<()>,
) -> Option<MessageStream> {
    CONNECTION.scope(id, listen(client, id, stream, listening)).await
}

async fn listen(
    client: Client,
    id: u64,
    mut stream: MessageStream,
    mut listening: watch::Receiver<()>,
) -> Option<MessageStream> {
    log::debug!("Listener of connection {} start", id);

    loop {
        let result = tokio::select! {
            biased;

            _ = listening.changed() => {
                log::debug!("Listener of connection {} stop", id);
                return Some(stream);
            }

            result = super::handshake::next_message(&mut stream) => result,
        };

        match result {
            Some(Ok(message)) => {
                log::trace!("Connection {} received {} message", id, message.type_name());
                client.handle_message(id, message).await;
            }
            Some(Err(err)) => {
                log::warn!("Connection {} broken: {}", id, err);
                break;
            }
            None => {
                log::warn!("Connection {} ended by peer", id);
                break;
            }
        }
    }

    client.fail_connection(id);

    None
}
