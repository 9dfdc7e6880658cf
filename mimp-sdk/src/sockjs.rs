//! SockJS WebSocket-transport framing.
//!
//! The server wraps every payload in a one-letter frame: `o` open,
//! `h` heartbeat, `a[..]` message array, `m".."` single message,
//! `c[code,"reason"]` close. The client sends JSON arrays of strings.

use rand::Rng;
use rand::distributions::Alphanumeric;
use url::Url;

/// Length of the random session segment in the transport URL.
const SESSION_ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SockJsError {
    #[error("empty SockJS frame")]
    Empty,
    #[error("unknown SockJS frame type {0:?}")]
    UnknownType(char),
    #[error("malformed SockJS payload: {0}")]
    Payload(String),
}

/// Decode one server frame.
pub fn decode(text: &str) -> Result<SockJsFrame, SockJsError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(SockJsError::Empty)?;
    let rest = chars.as_str();
    match kind {
        'o' => Ok(SockJsFrame::Open),
        'h' => Ok(SockJsFrame::Heartbeat),
        'a' => {
            let messages: Vec<String> =
                serde_json::from_str(rest).map_err(|e| SockJsError::Payload(e.to_string()))?;
            Ok(SockJsFrame::Messages(messages))
        }
        'm' => {
            let message: String =
                serde_json::from_str(rest).map_err(|e| SockJsError::Payload(e.to_string()))?;
            Ok(SockJsFrame::Messages(vec![message]))
        }
        'c' => {
            let (code, reason): (u16, String) =
                serde_json::from_str(rest).map_err(|e| SockJsError::Payload(e.to_string()))?;
            Ok(SockJsFrame::Close { code, reason })
        }
        other => Err(SockJsError::UnknownType(other)),
    }
}

/// Encode a client payload as a one-element JSON array.
pub fn encode(payload: &str) -> String {
    // Serializing a slice of &str cannot fail.
    serde_json::to_string(&[payload]).unwrap_or_else(|_| "[]".to_string())
}

/// Build `<endpoint>/<server-id>/<session-id>/websocket` under `endpoint`.
pub fn session_url<R: Rng>(endpoint: &Url, rng: &mut R) -> Url {
    let server_id = format!("{:03}", rng.gen_range(0..1000));
    let session_id: String = rng
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect();

    let mut url = endpoint.clone();
    let path = format!(
        "{}/{server_id}/{session_id}/websocket",
        endpoint.path().trim_end_matches('/')
    );
    url.set_path(&path);
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn decode_control_frames() {
        assert_eq!(decode("o").unwrap(), SockJsFrame::Open);
        assert_eq!(decode("h").unwrap(), SockJsFrame::Heartbeat);
        assert_eq!(decode("").unwrap_err(), SockJsError::Empty);
        assert_eq!(decode("x").unwrap_err(), SockJsError::UnknownType('x'));
    }

    #[test]
    fn decode_message_array() {
        let frame = decode(r#"a["CONNECTED\nversion:1.2\n\n\u0000","\n"]"#).unwrap();
        assert_eq!(
            frame,
            SockJsFrame::Messages(vec![
                "CONNECTED\nversion:1.2\n\n\0".to_string(),
                "\n".to_string()
            ])
        );
    }

    #[test]
    fn decode_single_message() {
        assert_eq!(
            decode(r#"m"hello""#).unwrap(),
            SockJsFrame::Messages(vec!["hello".to_string()])
        );
    }

    #[test]
    fn decode_close() {
        assert_eq!(
            decode(r#"c[3000,"Go away!"]"#).unwrap(),
            SockJsFrame::Close {
                code: 3000,
                reason: "Go away!".to_string()
            }
        );
    }

    #[test]
    fn malformed_array_is_payload_error() {
        assert!(matches!(decode("a[1,2]"), Err(SockJsError::Payload(_))));
        assert!(matches!(decode("c[]"), Err(SockJsError::Payload(_))));
    }

    #[test]
    fn encode_wraps_in_array() {
        assert_eq!(encode("SEND\n\n\0"), r#"["SEND\n\n\u0000"]"#);
    }

    #[test]
    fn session_url_shape() {
        let endpoint = Url::parse("ws://localhost:8181/mimp-ws").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let url = session_url(&endpoint, &mut rng);
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], "mimp-ws");
        assert_eq!(segments[1].len(), 3);
        assert!(segments[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(segments[2].len(), 8);
        assert!(segments[2].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(segments[3], "websocket");
        assert_eq!(url.host_str(), Some("localhost"));
        assert_eq!(url.port(), Some(8181));
    }

    #[test]
    fn session_url_with_trailing_slash() {
        let endpoint = Url::parse("ws://localhost/mimp-ws/").unwrap();
        let url = session_url(&endpoint, &mut StdRng::seed_from_u64(1));
        assert!(url.path().starts_with("/mimp-ws/"));
        assert!(!url.path().contains("//"));
    }
}
