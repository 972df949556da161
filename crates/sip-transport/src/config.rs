//! Transport configuration (spec.md §6 "Configuration options"). Plain
//! struct with a `Default` impl, matching how the teacher crates take
//! configuration as constructor arguments rather than a file/env loader.

/// Configuration knobs for a [`crate::transport::Transport`] instance.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// IPv4 vs IPv6 DNS preference.
    pub prefer_ipv6_name_resolution: bool,
    /// Allow on-demand client channel creation for unsupported
    /// protocol/family combinations.
    pub can_create_missing_channels: bool,
    /// Bounded inbound queue capacity; `0` means unlimited.
    pub max_in_message_queue: usize,
    /// Override the Contact URI host on outbound messages.
    pub contact_host: Option<String>,
    /// Run transaction timers but suppress wire retransmits.
    pub disable_retransmit_sending: bool,
    /// Maximum accepted message size before a `413` is generated.
    pub max_message_size: usize,
    /// Connect timeout for connection-oriented channels (spec.md §5
    /// "Timeouts").
    pub connect_timeout: std::time::Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            prefer_ipv6_name_resolution: false,
            can_create_missing_channels: true,
            max_in_message_queue: 1024,
            contact_host: None,
            disable_retransmit_sending: false,
            max_message_size: sip_core::framing::DEFAULT_MAX_MESSAGE_SIZE,
            connect_timeout: std::time::Duration::from_secs(5),
        }
    }
}
