use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the client.
///
/// Groups client identity, dispatcher and subscription defaults.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub client: ClientSettings,
    pub dispatcher: DispatcherSettings,
    pub subscription: SubscriptionSettings,
}

/// Identity and logging for the client process.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub name: String,
    pub log_level: String,
}

/// Settings applied to every dispatcher a connection creates.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DispatcherSettings {
    /// Prefix for dispatch thread names; a sequence number is appended.
    pub thread_name_prefix: String,
}

/// Defaults for pull subscriptions.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SubscriptionSettings {
    /// Timeout used by `Subscription::next_message_default`.
    pub default_timeout_ms: u64,
}

impl SubscriptionSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub client: Option<PartialClientSettings>,
    pub dispatcher: Option<PartialDispatcherSettings>,
    pub subscription: Option<PartialSubscriptionSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub name: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDispatcherSettings {
    pub thread_name_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSubscriptionSettings {
    pub default_timeout_ms: Option<u64>,
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let client = self.client;
        let dispatcher = self.dispatcher;
        let subscription = self.subscription;

        Settings {
            client: ClientSettings {
                name: client
                    .as_ref()
                    .and_then(|c| c.name.clone())
                    .unwrap_or(defaults.client.name),
                log_level: client
                    .as_ref()
                    .and_then(|c| c.log_level.clone())
                    .unwrap_or(defaults.client.log_level),
            },
            dispatcher: DispatcherSettings {
                thread_name_prefix: dispatcher
                    .and_then(|d| d.thread_name_prefix)
                    .unwrap_or(defaults.dispatcher.thread_name_prefix),
            },
            subscription: SubscriptionSettings {
                default_timeout_ms: subscription
                    .and_then(|s| s.default_timeout_ms)
                    .unwrap_or(defaults.subscription.default_timeout_ms),
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client: ClientSettings {
                name: "popsub-client".to_string(),
                log_level: "info".to_string(),
            },
            dispatcher: DispatcherSettings {
                thread_name_prefix: "popsub-dispatch".to_string(),
            },
            subscription: SubscriptionSettings {
                default_timeout_ms: 1000,
            },
        }
    }
}
