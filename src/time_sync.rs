//! NTP-style time exchange. Stateless: any instance can answer, nothing is
//! cached, and the path is deliberately cheap so clients can poll it for
//! clock-offset estimation.

use crate::utils::now_ms;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeExchangeRequest {
    pub client_send_time: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeExchangeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_send_time: Option<u64>,
    pub server_receive_time: u64,
    pub server_send_time: u64,
    pub server_processing_time: u64,
}

/// Captures the receive timestamp on entry and the send timestamp on exit,
/// so `server_receive_time <= server_send_time` always holds.
pub fn exchange(req: TimeExchangeRequest) -> TimeExchangeResponse {
    let server_receive_time = now_ms();
    let server_send_time = now_ms();
    TimeExchangeResponse {
        client_send_time: req.client_send_time,
        server_receive_time,
        server_send_time,
        server_processing_time: server_send_time.saturating_sub(server_receive_time),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_not_after_send() {
        let resp = exchange(TimeExchangeRequest::default());
        assert!(resp.server_receive_time <= resp.server_send_time);
        assert_eq!(
            resp.server_processing_time,
            resp.server_send_time - resp.server_receive_time
        );
    }

    #[test]
    fn test_client_send_time_echoed() {
        let resp = exchange(TimeExchangeRequest {
            client_send_time: Some(1000),
        });
        assert_eq!(resp.client_send_time, Some(1000));

        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""clientSendTime":1000"#));
        assert!(json.contains("serverReceiveTime"));
    }

    #[test]
    fn test_absent_client_time_is_omitted() {
        let resp = exchange(TimeExchangeRequest::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("clientSendTime"));
    }

    #[test]
    fn test_request_parses_empty_body() {
        let req: TimeExchangeRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.client_send_time, None);

        let req: TimeExchangeRequest =
            serde_json::from_str(r#"{"clientSendTime": 1000}"#).unwrap();
        assert_eq!(req.client_send_time, Some(1000));
    }
}
