use std::{io, time::Duration};

use log::{info, warn};
use tokio::{net::TcpStream, time};

/// Connects to the sender at `addr`, retrying while it isn't listening yet.
///
/// # Arguments
/// * `addr` - The sender's address.
/// * `attempts` - How many times to try, at least once.
/// * `backoff` - The wait between attempts.
///
/// # Returns
/// The connected stream or the last attempt's error.
pub async fn connect(addr: &str, attempts: u32, backoff: Duration) -> io::Result<TcpStream> {
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!(attempt = attempt; "connected to {addr}");
                return Ok(stream);
            }
            Err(e) if attempt < attempts => {
                warn!(attempt = attempt; "failed to connect to {addr}: {e}, retrying in {backoff:?}");
                time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn connects_to_a_listener() {
        let list = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = list.local_addr().unwrap().to_string();

        let (connected, accepted) = tokio::join!(
            connect(&addr, 1, Duration::from_millis(10)),
            list.accept()
        );

        connected.unwrap();
        accepted.unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        // Bind and drop to get a port nobody listens on.
        let list = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = list.local_addr().unwrap().to_string();
        drop(list);

        let err = connect(&addr, 3, Duration::from_millis(1)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
