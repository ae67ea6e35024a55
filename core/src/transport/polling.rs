/// Engine.IO HTTP long-polling connection
use super::packet::{decode_payload, encode_payload, EnginePacket, Handshake, PAYLOAD_SEPARATOR};
use crate::error::{ClientError, Result};
use crate::http::HttpClient;
use std::collections::VecDeque;
use tracing::{debug, warn};

pub(super) struct PollingConn {
    http: HttpClient,
    url: String,
    buffer: VecDeque<EnginePacket>,
}

impl PollingConn {
    /// Perform the polling handshake against `base_url`
    pub(super) async fn open(http: HttpClient, base_url: &str) -> Result<(Self, Handshake)> {
        let response = http.get(base_url, &[]).await?;
        if !response.status.is_success() {
            return Err(ClientError::Connection(format!(
                "Polling handshake rejected with {}",
                response.status
            )));
        }

        let mut packets: VecDeque<EnginePacket> = decode_payload(&response.text()?)?.into();
        let handshake = match packets.pop_front() {
            Some(EnginePacket::Open(handshake)) => handshake,
            other => {
                return Err(ClientError::Protocol(format!(
                    "Expected open packet, got {:?}",
                    other
                )))
            }
        };
        debug!("Polling session {} opened", handshake.sid);

        let url = format!("{}&sid={}", base_url, urlencoding::encode(&handshake.sid));
        Ok((
            Self {
                http,
                url,
                buffer: packets,
            },
            handshake,
        ))
    }

    /// Next packet; `None` once the server has dropped the session
    pub(super) async fn recv(&mut self) -> Result<Option<EnginePacket>> {
        loop {
            if let Some(packet) = self.buffer.pop_front() {
                return Ok(Some(packet));
            }

            let response = self.http.get_unbounded(&self.url, &[]).await?;
            if response.status.is_client_error() {
                debug!("Polling session ended with {}", response.status);
                return Ok(None);
            }
            if !response.status.is_success() {
                return Err(ClientError::Connection(format!(
                    "Poll failed with {}",
                    response.status
                )));
            }
            for part in response.text()?.split(PAYLOAD_SEPARATOR) {
                if part.is_empty() {
                    continue;
                }
                match EnginePacket::decode(part) {
                    Ok(packet) => self.buffer.push_back(packet),
                    Err(e) => warn!("Dropping malformed engine packet: {}", e),
                }
            }
        }
    }

    pub(super) async fn send(&mut self, packet: EnginePacket) -> Result<()> {
        let body = encode_payload(&[packet])?;
        let response = self
            .http
            .post(
                &self.url,
                &[("content-type", "text/plain;charset=UTF-8".to_string())],
                body,
            )
            .await?;
        if !response.status.is_success() {
            return Err(ClientError::Connection(format!(
                "Post failed with {}",
                response.status
            )));
        }
        Ok(())
    }

    pub(super) async fn close(&mut self) {
        if let Err(e) = self.send(EnginePacket::Close).await {
            debug!("Failed to send close packet: {}", e);
        }
    }
}
