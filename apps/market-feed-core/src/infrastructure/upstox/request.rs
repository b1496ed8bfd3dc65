//! Feed Requests
//!
//! Subscription commands sent on the market data socket. The exchange
//! expects UTF-8 JSON carried in a binary frame:
//!
//! ```json
//! {"guid":"…","method":"sub","data":{"mode":"full","instrumentKeys":["NSE_EQ|…"]}}
//! ```

use serde::Serialize;
use uuid::Uuid;

use crate::domain::market::InstrumentKey;
use crate::domain::subscription::FeedMode;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Start streaming instruments.
    Sub,
    /// Stop streaming instruments.
    Unsub,
    /// Switch already streamed instruments to another mode.
    ChangeMode,
}

/// One subscription command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedRequest {
    guid: String,
    method: Method,
    data: RequestData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestData {
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'static str>,
    instrument_keys: Vec<InstrumentKey>,
}

impl FeedRequest {
    fn new(method: Method, mode: Option<FeedMode>, keys: Vec<InstrumentKey>) -> Self {
        Self {
            guid: Uuid::new_v4().simple().to_string(),
            method,
            data: RequestData {
                mode: mode.map(|m| m.as_wire()),
                instrument_keys: keys,
            },
        }
    }

    /// Subscribe `keys` in `mode`.
    #[must_use]
    pub fn subscribe(keys: Vec<InstrumentKey>, mode: FeedMode) -> Self {
        Self::new(Method::Sub, Some(mode), keys)
    }

    /// Unsubscribe `keys`.
    #[must_use]
    pub fn unsubscribe(keys: Vec<InstrumentKey>) -> Self {
        Self::new(Method::Unsub, None, keys)
    }

    /// Move already subscribed `keys` to `mode`.
    #[must_use]
    pub fn change_mode(keys: Vec<InstrumentKey>, mode: FeedMode) -> Self {
        Self::new(Method::ChangeMode, Some(mode), keys)
    }

    /// Request method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Instruments carried.
    #[must_use]
    pub fn keys(&self) -> &[InstrumentKey] {
        &self.data.instrument_keys
    }

    /// Frame payload.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; not expected for well-formed keys.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn json(request: &FeedRequest) -> Value {
        serde_json::from_slice(&request.encode().unwrap()).unwrap()
    }

    #[test]
    fn subscribe_shape() {
        let request = FeedRequest::subscribe(
            vec!["NSE_EQ|A".into(), "NSE_FO|B".into()],
            FeedMode::FullD30,
        );
        let value = json(&request);

        assert_eq!(value["method"], "sub");
        assert_eq!(value["data"]["mode"], "full_d30");
        assert_eq!(value["data"]["instrumentKeys"][1], "NSE_FO|B");
        assert_eq!(value["guid"].as_str().unwrap().len(), 32);
    }

    #[test]
    fn unsubscribe_has_no_mode() {
        let value = json(&FeedRequest::unsubscribe(vec!["NSE_EQ|A".into()]));
        assert_eq!(value["method"], "unsub");
        assert!(value["data"].get("mode").is_none());
    }

    #[test]
    fn change_mode_shape() {
        let request = FeedRequest::change_mode(vec!["NSE_EQ|A".into()], FeedMode::Ltpc);
        assert_eq!(request.method(), Method::ChangeMode);
        assert_eq!(json(&request)["method"], "change_mode");
        assert_eq!(request.keys(), ["NSE_EQ|A".to_string()]);
    }

    #[test]
    fn guids_are_unique() {
        let a = FeedRequest::unsubscribe(vec![]);
        let b = FeedRequest::unsubscribe(vec![]);
        assert_ne!(a.guid, b.guid);
    }
}
