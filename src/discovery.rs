//! UDP peer discovery.
//!
//! A node below its configured degree solicits connections by sending
//! `meshage:<name>` beacons to the limited broadcast address, backing off
//! with randomized, exponentially growing sleeps. Every node also listens
//! for beacons and dials the soliciting peer by name.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;

use crate::config::BEACON_PREFIX;
use crate::error::{MeshError, MeshResult};
use crate::handshake;
use crate::node::Shared;

/// Re-enter the solicitation loop if the node is below its degree.
///
/// An atomic in-progress flag short-circuits concurrent entries, so at
/// most one solicitation task runs at a time.
pub(crate) fn maintain_degree(shared: &Arc<Shared>) {
    if shared.degree() == 0 || shared.registry.len() >= shared.degree() {
        return;
    }
    if shared
        .soliciting
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    tokio::spawn(solicit(shared.clone()));
}

/// Emit connection solicitations until the degree is satisfied.
async fn solicit(shared: Arc<Shared>) {
    let mut shutdown_rx = shared.shutdown_rx();
    let beacon = format!("{BEACON_PREFIX}:{}", shared.name());

    let result: MeshResult<()> = async {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;

        let mut backoff: u32 = 1;
        while shared.registry.len() < shared.degree() {
            tracing::debug!("soliciting connections");
            socket
                .send_to(beacon.as_bytes(), shared.config.beacon_target)
                .await?;

            let wait = rand::thread_rng().gen_range(0..(1u64 << backoff));
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
                _ = shutdown_rx.recv() => return Ok(()),
            }
            // Maximum wait won't exceed 2^max_backoff_exp seconds.
            if backoff < shared.config.max_backoff_exp {
                backoff += 1;
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        shared.report(e);
    }
    shared.soliciting.store(false, Ordering::Release);
}

/// Listen for solicitation beacons and dial the senders.
pub(crate) async fn listen(shared: Arc<Shared>, socket: UdpSocket) {
    let mut shutdown_rx = shared.shutdown_rx();
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    let host = match parse_beacon(&buf[..len]) {
                        Ok(host) => host,
                        Err(e) => {
                            shared.report(e);
                            continue;
                        }
                    };
                    if host == shared.name() {
                        tracing::debug!("got solicitation from myself, dropping");
                        continue;
                    }
                    tracing::debug!(%host, %from, "got solicitation");
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handshake::dial(&shared, &host, true).await {
                            tracing::debug!(%host, error = %e, "solicited dial failed");
                        }
                    });
                }
                Err(e) => shared.report(e.into()),
            },
        }
    }
    tracing::debug!("beacon listener stopped");
}

/// Parse a discovery datagram of the form `meshage:<name>`.
pub fn parse_beacon(data: &[u8]) -> MeshResult<String> {
    let text = std::str::from_utf8(data)
        .map_err(|_| MeshError::MalformedBeacon(String::from_utf8_lossy(data).into_owned()))?;

    let mut parts = text.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(BEACON_PREFIX), Some(name), None) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(MeshError::MalformedBeacon(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_beacon() {
        assert_eq!(parse_beacon(b"meshage:alpha").unwrap(), "alpha");
    }

    #[test]
    fn test_parse_beacon_rejects_wrong_prefix() {
        assert!(matches!(
            parse_beacon(b"gossip:alpha"),
            Err(MeshError::MalformedBeacon(_))
        ));
    }

    #[test]
    fn test_parse_beacon_rejects_extra_fields() {
        assert!(parse_beacon(b"meshage:alpha:extra").is_err());
    }

    #[test]
    fn test_parse_beacon_rejects_empty_name() {
        assert!(parse_beacon(b"meshage:").is_err());
        assert!(parse_beacon(b"meshage").is_err());
    }

    #[test]
    fn test_parse_beacon_rejects_invalid_utf8() {
        assert!(parse_beacon(&[0xFF, 0xFE, 0x3A]).is_err());
    }
}
