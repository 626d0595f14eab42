use hyper_util::rt::TokioIo;
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Copies bytes in both directions between the client's upgraded connection
/// and the established upstream tunnel until either side closes or the
/// connection is cancelled (client disconnect propagated from the ingress
/// accept loop).
pub async fn copy_bidirectional<C, U>(
    client: TokioIo<C>,
    upstream: U,
    cancel: CancellationToken,
) -> io::Result<(u64, u64)>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let mut client = client;
    let mut upstream = upstream;

    tokio::select! {
        result = io::copy_bidirectional(&mut client, &mut upstream) => {
            let (from_client, from_upstream) = result?;
            debug!(from_client, from_upstream, "tunnel closed");
            Ok((from_client, from_upstream))
        }
        _ = cancel.cancelled() => {
            debug!("tunnel cancelled by client disconnect");
            Ok((0, 0))
        }
    }
}
