//! Session contexts stored as correlation cache values.

use serde::{Deserialize, Serialize};

/// What a client remembers about an in-flight submit fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    pub addr: String,
    pub user_name: String,
    pub sp_id: String,
    pub sp_code: String,
    pub phone: String,
}

/// What the server remembers about an accepted submit, keyed by Msg_Id.
/// `addr` is the connection its delivery reports go back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerContext {
    pub addr: String,
    pub user_name: String,
    pub sp_id: String,
    pub sp_code: String,
}

macro_rules! json_codec {
    ($ty:ty) => {
        impl $ty {
            pub fn encode(&self) -> Result<String, serde_json::Error> {
                serde_json::to_string(self)
            }

            pub fn decode(value: &str) -> Result<Self, serde_json::Error> {
                serde_json::from_str(value)
            }
        }
    };
}

json_codec!(ClientContext);
json_codec!(ServerContext);
