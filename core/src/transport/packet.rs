/// Engine.IO v4 and Socket.IO v5 text packet codec
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine.IO protocol revision
pub const ENGINE_PROTOCOL: u8 = 4;

/// Separates packets in a long-polling payload
pub const PAYLOAD_SEPARATOR: char = '\u{1e}';

/// Default Socket.IO namespace
pub const DEFAULT_NAMESPACE: &str = "/";

/// Server parameters sent in the Engine.IO open packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            EnginePacket::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        })
    }

    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ClientError::Protocol("Empty engine packet".to_string()))?;
        let data = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(data)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(data.to_string())),
            '3' => Ok(EnginePacket::Pong(data.to_string())),
            '4' => Ok(EnginePacket::Message(data.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            'b' => Err(ClientError::Protocol(
                "Binary engine packets are not supported".to_string(),
            )),
            other => Err(ClientError::Protocol(format!(
                "Unknown engine packet type '{}'",
                other
            ))),
        }
    }
}

/// Join packets into one long-polling body
pub fn encode_payload(packets: &[EnginePacket]) -> Result<String> {
    let encoded = packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Result<Vec<_>>>()?;
    Ok(encoded.join(&PAYLOAD_SEPARATOR.to_string()))
}

/// Split a long-polling body into packets
pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split(PAYLOAD_SEPARATOR).map(EnginePacket::decode).collect()
}

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// CONNECT to the default namespace with an auth payload
    pub fn connect(auth: Value) -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: Some(auth),
        }
    }

    pub fn disconnect() -> Self {
        SocketPacket::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn encode(&self) -> Result<String> {
        let (kind, id, data) = match self {
            SocketPacket::Connect { data, .. } => ('0', None, data.clone()),
            SocketPacket::Disconnect { .. } => ('1', None, None),
            SocketPacket::Event { id, name, args, .. } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                ('2', *id, Some(Value::Array(array)))
            }
            SocketPacket::Ack { id, args, .. } => ('3', Some(*id), Some(Value::Array(args.clone()))),
            SocketPacket::ConnectError { data, .. } => ('4', None, data.clone()),
        };

        let mut out = String::new();
        out.push(kind);
        let namespace = self.namespace();
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = data {
            out.push_str(&serde_json::to_string(&data)?);
        }
        Ok(out)
    }

    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ClientError::Protocol("Empty socket packet".to_string()))?;
        let mut rest = chars.as_str();

        if kind == '5' || kind == '6' {
            return Err(ClientError::Protocol(
                "Binary socket packets are not supported".to_string(),
            ));
        }

        let namespace = if rest.starts_with('/') {
            match rest.split_once(',') {
                Some((ns, tail)) => {
                    rest = tail;
                    ns.to_string()
                }
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| ClientError::Protocol(format!("Invalid ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace, data }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(args)) => args,
                    _ => {
                        return Err(ClientError::Protocol(
                            "Event packet without an argument array".to_string(),
                        ))
                    }
                };
                if args.is_empty() {
                    return Err(ClientError::Protocol("Event packet without a name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ClientError::Protocol(format!(
                            "Event name must be a string, got {}",
                            other
                        )))
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => {
                let id = id.ok_or_else(|| ClientError::Protocol("Ack without id".to_string()))?;
                let args = match data {
                    Some(Value::Array(args)) => args,
                    _ => Vec::new(),
                };
                Ok(SocketPacket::Ack { namespace, id, args })
            }
            '4' => Ok(SocketPacket::ConnectError { namespace, data }),
            other => Err(ClientError::Protocol(format!(
                "Unknown socket packet type '{}'",
                other
            ))),
        }
    }
}
