pub mod events;
pub mod secret;

pub mod settings {
    use serde::{Deserialize, Serialize};

    fn default_model() -> String {
        "gemini-2.5-pro-preview-03-25".into()
    }

    fn default_api_base_url() -> String {
        "https://generativelanguage.googleapis.com/v1beta".into()
    }

    fn default_max_page_chars() -> usize {
        500_000
    }

    fn default_connect_timeout_secs() -> u64 {
        30
    }

    /// Runtime settings for the generation coordinator.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CoordinatorSettings {
        #[serde(default = "default_model")]
        pub model: String, // e.g., "gemini-1.5-flash"
        #[serde(default = "default_api_base_url")]
        pub api_base_url: String,
        /// Page text is cut to this many characters before prompting
        #[serde(default = "default_max_page_chars")]
        pub max_page_chars: usize,
        /// Abort a stream that yields no chunk for this long. Off unless set.
        #[serde(default)]
        pub stall_timeout_secs: Option<u64>,
        #[serde(default = "default_connect_timeout_secs")]
        pub connect_timeout_secs: u64,
    }

    impl Default for CoordinatorSettings {
        fn default() -> Self {
            Self {
                model: default_model(),
                api_base_url: default_api_base_url(),
                max_page_chars: default_max_page_chars(),
                stall_timeout_secs: None,
                connect_timeout_secs: default_connect_timeout_secs(),
            }
        }
    }
}

pub mod agent_api {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /// Opaque token minted by a panel; scopes requests and notifications.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct InstanceId(String);

    impl InstanceId {
        pub fn new() -> Self {
            Self(uuid::Uuid::new_v4().to_string())
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl Default for InstanceId {
        fn default() -> Self {
            Self::new()
        }
    }

    impl From<&str> for InstanceId {
        fn from(value: &str) -> Self {
            Self(value.to_string())
        }
    }

    impl From<String> for InstanceId {
        fn from(value: String) -> Self {
            Self(value)
        }
    }

    impl fmt::Display for InstanceId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// Panel -> coordinator requests.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(
        tag = "action",
        rename_all = "camelCase",
        rename_all_fields = "camelCase"
    )]
    pub enum Request {
        ProcessChat {
            instance_id: Option<InstanceId>,
            message: String,
        },
        StopGeneration {
            instance_id: Option<InstanceId>,
        },
        SaveApiKey {
            api_key: String,
        },
        GetApiKey,
    }

    /// Synchronous acknowledgment for a request.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub success: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub api_key: Option<String>,
    }

    impl Response {
        pub fn ok() -> Self {
            Self {
                success: Some(true),
                ..Default::default()
            }
        }

        pub fn ok_with_message(message: impl Into<String>) -> Self {
            Self {
                success: Some(true),
                message: Some(message.into()),
                ..Default::default()
            }
        }

        /// Not an error, just nothing done (e.g. stop with no generation).
        pub fn declined(message: impl Into<String>) -> Self {
            Self {
                success: Some(false),
                message: Some(message.into()),
                ..Default::default()
            }
        }

        pub fn failed(error: impl Into<String>) -> Self {
            Self {
                success: Some(false),
                error: Some(error.into()),
                ..Default::default()
            }
        }

        pub fn api_key(api_key: Option<String>) -> Self {
            Self {
                api_key,
                ..Default::default()
            }
        }

        pub fn is_success(&self) -> bool {
            self.success.unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::agent_api::{InstanceId, Request, Response};
    use super::settings::CoordinatorSettings;

    #[test]
    fn test_request_wire_shape() {
        let req: Request = serde_json::from_str(
            r#"{"action":"processChat","message":"hi","instanceId":"panel-1"}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            Request::ProcessChat {
                instance_id: Some(InstanceId::from("panel-1")),
                message: "hi".into(),
            }
        );

        let req: Request = serde_json::from_str(r#"{"action":"stopGeneration"}"#).unwrap();
        assert_eq!(req, Request::StopGeneration { instance_id: None });

        let req: Request =
            serde_json::from_str(r#"{"action":"saveApiKey","apiKey":"abc"}"#).unwrap();
        assert_eq!(req, Request::SaveApiKey { api_key: "abc".into() });

        let req: Request = serde_json::from_str(r#"{"action":"getApiKey"}"#).unwrap();
        assert_eq!(req, Request::GetApiKey);
    }

    #[test]
    fn test_response_skips_empty_fields() {
        let json = serde_json::to_value(Response::declined("No active generation to stop.")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": false, "message": "No active generation to stop."})
        );

        let json = serde_json::to_value(Response::api_key(None)).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn test_instance_ids_are_unique() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }

    #[test]
    fn test_settings_defaults_fill_missing_fields() {
        let settings: CoordinatorSettings =
            serde_json::from_str(r#"{"model":"gemini-1.5-flash"}"#).unwrap();
        assert_eq!(settings.model, "gemini-1.5-flash");
        assert_eq!(settings.max_page_chars, 500_000);
        assert_eq!(settings.stall_timeout_secs, None);
    }
}
