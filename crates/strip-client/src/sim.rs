//! In-memory simulated client.
//!
//! `SimClient` keeps a table of known channels and answers requests the way
//! a real pub/sub client would: replies are queued, released on `flush` or
//! `pend_event`, and handed out one at a time by `poll_event`. Server-side
//! changes (`set_value`, `set_reachable`) only surface on `pend_event`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, trace};

use crate::records::{ConnectionState, ControlInfo, StatusSample};
use crate::traits::{
    ChannelHandle, ClientError, ClientEvent, PubSubClient, SourceId, SubscriptionHandle, UserTag,
};

/// Default readiness source reported by the simulator.
pub const SIM_SOURCE: SourceId = SourceId(3);

/// Operations whose next invocation can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    /// `connect` returns an error.
    Connect,
    /// `get_control` returns an error.
    GetControl,
    /// `get_control` succeeds but its delivery carries an error status.
    ControlDelivery,
    /// `subscribe` returns an error.
    Subscribe,
    /// `cancel` returns an error.
    Cancel,
    /// `release` returns an error.
    Release,
    /// `flush` returns an error.
    Flush,
    /// `resolve` times out.
    Resolve,
    /// `read_string` times out.
    ReadString,
}

/// A simulated channel definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimChannelConfig {
    /// Channel name.
    pub name: String,
    /// Metadata served for the channel.
    #[serde(flatten)]
    pub info: ControlInfo,
    /// Text served for the channel's description companion.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the channel's server is reachable at startup.
    #[serde(default = "default_true")]
    pub reachable: bool,
}

fn default_true() -> bool {
    true
}

/// Simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Suffix of the companion description channels.
    #[serde(default = "default_description_suffix")]
    pub description_suffix: String,
    /// Known channels.
    #[serde(default)]
    pub channels: Vec<SimChannelConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            description_suffix: default_description_suffix(),
            channels: Vec::new(),
        }
    }
}

fn default_description_suffix() -> String {
    DEFAULT_DESCRIPTION_SUFFIX.to_string()
}

/// Default suffix of the companion description channels.
pub const DEFAULT_DESCRIPTION_SUFFIX: &str = ".DESC";

#[derive(Debug)]
struct SimChannel {
    info: ControlInfo,
    reachable: bool,
}

#[derive(Debug)]
struct OpenChannel {
    name: String,
    tag: Option<UserTag>,
}

#[derive(Debug)]
struct Subscription {
    channel: u64,
    tag: UserTag,
}

/// In-memory pub/sub client.
#[derive(Debug)]
pub struct SimClient {
    initialized: bool,
    source: SourceId,
    source_active: bool,
    channels: HashMap<String, SimChannel>,
    /// Description text keyed by the described channel's name.
    descriptions: HashMap<String, String>,
    description_suffix: String,
    open: HashMap<u64, OpenChannel>,
    subscriptions: HashMap<u64, Subscription>,
    next_id: u64,
    /// Replies to requests, released by `flush` or `pend_event`.
    outgoing: Vec<ClientEvent>,
    /// Server-originated changes, released by `pend_event`.
    incoming: Vec<ClientEvent>,
    ready: VecDeque<ClientEvent>,
    failures: HashSet<SimOp>,
}

impl SimClient {
    /// Create an empty simulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            source: SIM_SOURCE,
            source_active: false,
            channels: HashMap::new(),
            descriptions: HashMap::new(),
            description_suffix: default_description_suffix(),
            open: HashMap::new(),
            subscriptions: HashMap::new(),
            next_id: 1,
            outgoing: Vec::new(),
            incoming: Vec::new(),
            ready: VecDeque::new(),
            failures: HashSet::new(),
        }
    }

    /// Create a simulator from configuration.
    #[must_use]
    pub fn from_config(config: &SimConfig) -> Self {
        let mut client = Self::new().with_description_suffix(&config.description_suffix);
        for channel in &config.channels {
            client.add_channel(&channel.name, channel.info.clone());
            if let Some(text) = &channel.description {
                client.add_description(&channel.name, text);
            }
            if !channel.reachable {
                client.set_reachable(&channel.name, false);
            }
        }
        client
    }

    /// Add a known channel.
    #[must_use]
    pub fn with_channel(mut self, name: &str, info: ControlInfo) -> Self {
        self.add_channel(name, info);
        self
    }

    /// Add a known channel.
    pub fn add_channel(&mut self, name: &str, info: ControlInfo) {
        self.channels.insert(
            name.to_string(),
            SimChannel {
                info,
                reachable: true,
            },
        );
    }

    /// Serve description companions under `suffix` instead of `.DESC`.
    #[must_use]
    pub fn with_description_suffix(mut self, suffix: &str) -> Self {
        self.description_suffix = suffix.to_string();
        self
    }

    /// Serve `text` as the description companion of `name`.
    pub fn add_description(&mut self, name: &str, text: &str) {
        self.descriptions.insert(name.to_string(), text.to_string());
    }

    fn description(&self, companion: &str) -> Option<&String> {
        let name = companion.strip_suffix(self.description_suffix.as_str())?;
        self.descriptions.get(name)
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&mut self, op: SimOp) {
        self.failures.insert(op);
    }

    /// Queue a raw server-side delivery, released by the next `pend_event`.
    pub fn inject(&mut self, event: ClientEvent) {
        self.incoming.push(event);
    }

    /// Update a channel's value, notifying its subscriptions.
    ///
    /// Returns `false` if the channel is unknown.
    pub fn set_value(&mut self, name: &str, value: f64) -> bool {
        let Some(channel) = self.channels.get_mut(name) else {
            return false;
        };
        channel.info.value = value;
        if !channel.reachable {
            return true;
        }

        for tag in self.subscription_tags(name) {
            trace!(channel = %name, value, "Simulated update");
            self.incoming.push(ClientEvent::Sample {
                tag,
                result: Ok(StatusSample::new(value)),
            });
        }
        true
    }

    /// Mark a channel's server as reachable or not.
    ///
    /// Returns `false` if the channel is unknown.
    pub fn set_reachable(&mut self, name: &str, reachable: bool) -> bool {
        let Some(channel) = self.channels.get_mut(name) else {
            return false;
        };
        if channel.reachable == reachable {
            return true;
        }
        channel.reachable = reachable;
        let value = channel.info.value;
        debug!(channel = %name, reachable, "Simulated reachability change");

        let state = if reachable {
            ConnectionState::Connected
        } else {
            ConnectionState::PreviouslyConnected
        };
        let connection_tags: Vec<UserTag> = self
            .open
            .values()
            .filter(|c| c.name == name)
            .filter_map(|c| c.tag)
            .collect();
        for tag in connection_tags {
            self.incoming.push(ClientEvent::Connection { tag, state });
        }

        for tag in self.subscription_tags(name) {
            let result = if reachable {
                Ok(StatusSample::new(value))
            } else {
                Err(ClientError::Disconnected)
            };
            self.incoming.push(ClientEvent::Sample { tag, result });
        }
        true
    }

    /// Get a channel's current simulated value.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<f64> {
        self.channels.get(name).map(|c| c.info.value)
    }

    /// Get the number of open channel handles.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.open.len()
    }

    /// Get the number of active subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Check whether the client is initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Get the names of all known channels.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    fn subscription_tags(&self, name: &str) -> Vec<UserTag> {
        self.subscriptions
            .values()
            .filter(|s| self.open.get(&s.channel).is_some_and(|c| c.name == name))
            .map(|s| s.tag)
            .collect()
    }

    fn take_failure(&mut self, op: SimOp) -> bool {
        self.failures.remove(&op)
    }

    fn check_initialized(&self) -> Result<(), ClientError> {
        if self.initialized {
            Ok(())
        } else {
            Err(ClientError::NotInitialized)
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn open_name(&self, channel: ChannelHandle) -> Result<&str, ClientError> {
        self.open
            .get(&channel.0)
            .map(|c| c.name.as_str())
            .ok_or(ClientError::InvalidHandle)
    }

    fn release_ready(&mut self, include_incoming: bool) {
        self.ready.extend(self.outgoing.drain(..));
        if include_incoming {
            self.ready.extend(self.incoming.drain(..));
        }
    }
}

impl Default for SimClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSubClient for SimClient {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn initialize(&mut self) -> Result<(), ClientError> {
        self.initialized = true;
        debug!(channels = self.channels.len(), "Simulated client initialized");
        Ok(())
    }

    fn shutdown(&mut self) {
        self.initialized = false;
        self.source_active = false;
        self.open.clear();
        self.subscriptions.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.ready.clear();
        debug!("Simulated client shut down");
    }

    fn connect(&mut self, name: &str, tag: UserTag) -> Result<ChannelHandle, ClientError> {
        self.check_initialized()?;
        if self.take_failure(SimOp::Connect) {
            return Err(ClientError::Rejected("connect refused".into()));
        }

        if !self.source_active {
            self.source_active = true;
            self.outgoing.push(ClientEvent::Readiness {
                source: self.source,
                active: true,
            });
        }

        let id = self.allocate_id();
        self.open.insert(
            id,
            OpenChannel {
                name: name.to_string(),
                tag: Some(tag),
            },
        );

        match self.channels.get(name) {
            Some(channel) if channel.reachable => self.outgoing.push(ClientEvent::Connection {
                tag,
                state: ConnectionState::Connected,
            }),
            // Connected once the server becomes reachable.
            Some(_) => {}
            None => self.outgoing.push(ClientEvent::Connection {
                tag,
                state: ConnectionState::NeverConnected,
            }),
        }

        debug!(channel = %name, handle = id, "Simulated connect");
        Ok(ChannelHandle(id))
    }

    fn get_control(&mut self, channel: ChannelHandle, tag: UserTag) -> Result<(), ClientError> {
        self.check_initialized()?;
        if self.take_failure(SimOp::GetControl) {
            return Err(ClientError::Rejected("get refused".into()));
        }
        let name = self.open_name(channel)?.to_string();

        let result = if self.take_failure(SimOp::ControlDelivery) {
            Err(ClientError::Rejected("no read access".into()))
        } else {
            match self.channels.get(&name) {
                Some(c) if c.reachable => Ok(c.info.clone()),
                _ => Err(ClientError::Disconnected),
            }
        };
        self.outgoing.push(ClientEvent::Control { tag, result });
        Ok(())
    }

    fn subscribe(
        &mut self,
        channel: ChannelHandle,
        tag: UserTag,
    ) -> Result<SubscriptionHandle, ClientError> {
        self.check_initialized()?;
        if self.take_failure(SimOp::Subscribe) {
            return Err(ClientError::Rejected("subscribe refused".into()));
        }
        let name = self.open_name(channel)?.to_string();

        let id = self.allocate_id();
        self.subscriptions.insert(
            id,
            Subscription {
                channel: channel.0,
                tag,
            },
        );

        // Subscriptions start with the current value.
        if let Some(c) = self.channels.get(&name).filter(|c| c.reachable) {
            self.outgoing.push(ClientEvent::Sample {
                tag,
                result: Ok(StatusSample::new(c.info.value)),
            });
        }
        Ok(SubscriptionHandle(id))
    }

    fn cancel(&mut self, subscription: SubscriptionHandle) -> Result<(), ClientError> {
        self.check_initialized()?;
        if self.take_failure(SimOp::Cancel) {
            return Err(ClientError::Rejected("cancel refused".into()));
        }
        self.subscriptions
            .remove(&subscription.0)
            .map(|_| ())
            .ok_or(ClientError::InvalidHandle)
    }

    fn release(&mut self, channel: ChannelHandle) -> Result<(), ClientError> {
        self.check_initialized()?;
        if self.take_failure(SimOp::Release) {
            return Err(ClientError::Rejected("release refused".into()));
        }
        self.open
            .remove(&channel.0)
            .ok_or(ClientError::InvalidHandle)?;
        self.subscriptions.retain(|_, s| s.channel != channel.0);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ClientError> {
        self.check_initialized()?;
        if self.take_failure(SimOp::Flush) {
            return Err(ClientError::Rejected("flush failed".into()));
        }
        self.release_ready(false);
        Ok(())
    }

    fn pend_event(&mut self, _timeout: Duration) -> Result<(), ClientError> {
        self.check_initialized()?;
        self.release_ready(true);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<ClientEvent> {
        self.ready.pop_front()
    }

    fn resolve(&mut self, name: &str, timeout: Duration) -> Result<ChannelHandle, ClientError> {
        self.check_initialized()?;
        if self.take_failure(SimOp::Resolve) {
            return Err(ClientError::Timeout(timeout));
        }
        let known = self.description(name).is_some()
            || self.channels.get(name).is_some_and(|c| c.reachable);
        if !known {
            return Err(ClientError::Timeout(timeout));
        }

        let id = self.allocate_id();
        self.open.insert(
            id,
            OpenChannel {
                name: name.to_string(),
                tag: None,
            },
        );
        Ok(ChannelHandle(id))
    }

    fn read_string(
        &mut self,
        channel: ChannelHandle,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        self.check_initialized()?;
        if self.take_failure(SimOp::ReadString) {
            return Err(ClientError::Timeout(timeout));
        }
        let name = self.open_name(channel)?;
        if let Some(text) = self.description(name) {
            return Ok(text.clone());
        }
        self.channels
            .get(name)
            .map(|c| c.info.value.to_string())
            .ok_or(ClientError::Timeout(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Limits;

    fn info(value: f64) -> ControlInfo {
        ControlInfo {
            value,
            units: "V".into(),
            precision: 3,
            display: Limits::new(0.0, 10.0),
            control: Limits::default(),
        }
    }

    fn drain(client: &mut SimClient) -> Vec<ClientEvent> {
        std::iter::from_fn(|| client.poll_event()).collect()
    }

    #[test]
    fn test_requires_initialize() {
        let mut client = SimClient::new().with_channel("A", info(1.0));
        assert_eq!(
            client.connect("A", UserTag(1)),
            Err(ClientError::NotInitialized)
        );
    }

    #[test]
    fn test_connect_replies_on_flush() {
        let mut client = SimClient::new().with_channel("A", info(1.0));
        client.initialize().unwrap();

        client.connect("A", UserTag(1)).unwrap();
        assert!(client.poll_event().is_none());

        client.flush().unwrap();
        let events = drain(&mut client);
        assert_eq!(
            events,
            vec![
                ClientEvent::Readiness {
                    source: SIM_SOURCE,
                    active: true
                },
                ClientEvent::Connection {
                    tag: UserTag(1),
                    state: ConnectionState::Connected
                },
            ]
        );
    }

    #[test]
    fn test_unknown_name_never_connects() {
        let mut client = SimClient::new();
        client.initialize().unwrap();

        client.connect("NOPE", UserTag(9)).unwrap();
        client.flush().unwrap();
        let events = drain(&mut client);
        assert!(events.contains(&ClientEvent::Connection {
            tag: UserTag(9),
            state: ConnectionState::NeverConnected
        }));
    }

    #[test]
    fn test_updates_wait_for_pend_event() {
        let mut client = SimClient::new().with_channel("A", info(1.0));
        client.initialize().unwrap();
        let ch = client.connect("A", UserTag(1)).unwrap();
        client.subscribe(ch, UserTag(2)).unwrap();
        client.flush().unwrap();
        drain(&mut client);

        assert!(client.set_value("A", 4.0));
        client.flush().unwrap();
        assert!(client.poll_event().is_none());

        client.pend_event(Duration::from_millis(100)).unwrap();
        assert_eq!(
            client.poll_event(),
            Some(ClientEvent::Sample {
                tag: UserTag(2),
                result: Ok(StatusSample::new(4.0))
            })
        );
    }

    #[test]
    fn test_reachability_changes() {
        let mut client = SimClient::new().with_channel("A", info(1.0));
        client.initialize().unwrap();
        let ch = client.connect("A", UserTag(1)).unwrap();
        client.subscribe(ch, UserTag(2)).unwrap();
        client.flush().unwrap();
        drain(&mut client);

        client.set_reachable("A", false);
        client.pend_event(Duration::ZERO).unwrap();
        let events = drain(&mut client);
        assert_eq!(events.len(), 2);
        assert!(events.contains(&ClientEvent::Sample {
            tag: UserTag(2),
            result: Err(ClientError::Disconnected)
        }));

        client.set_reachable("A", true);
        client.pend_event(Duration::ZERO).unwrap();
        let events = drain(&mut client);
        assert!(events.contains(&ClientEvent::Connection {
            tag: UserTag(1),
            state: ConnectionState::Connected
        }));
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let mut client = SimClient::new().with_channel("A", info(1.0));
        client.initialize().unwrap();

        client.fail_next(SimOp::Connect);
        assert!(client.connect("A", UserTag(1)).is_err());
        assert!(client.connect("A", UserTag(1)).is_ok());
    }

    #[test]
    fn test_release_drops_subscriptions() {
        let mut client = SimClient::new().with_channel("A", info(1.0));
        client.initialize().unwrap();
        let ch = client.connect("A", UserTag(1)).unwrap();
        client.subscribe(ch, UserTag(2)).unwrap();
        assert_eq!(client.subscription_count(), 1);

        client.release(ch).unwrap();
        assert_eq!(client.open_channels(), 0);
        assert_eq!(client.subscription_count(), 0);
        assert_eq!(client.release(ch), Err(ClientError::InvalidHandle));
    }

    #[test]
    fn test_description_lookup() {
        let mut client = SimClient::new().with_channel("A", info(1.0));
        client.add_description("A", "Beam current");
        client.initialize().unwrap();

        let timeout = Duration::from_secs(1);
        let handle = client.resolve("A.DESC", timeout).unwrap();
        assert_eq!(client.read_string(handle, timeout).unwrap(), "Beam current");
        assert_eq!(
            client.resolve("B.DESC", timeout),
            Err(ClientError::Timeout(timeout))
        );
    }

    #[test]
    fn test_description_suffix() {
        let mut client = SimClient::new()
            .with_channel("A", info(1.0))
            .with_description_suffix(":DESC");
        client.add_description("A", "Beam current");
        client.initialize().unwrap();

        let timeout = Duration::from_secs(1);
        assert!(client.resolve("A.DESC", timeout).is_err());
        let handle = client.resolve("A:DESC", timeout).unwrap();
        assert_eq!(client.read_string(handle, timeout).unwrap(), "Beam current");
    }

    #[test]
    fn test_from_config() {
        let config: SimConfig = toml::from_str(
            r#"
            [[channels]]
            name = "PS:CURRENT"
            value = 12.5
            units = "A"
            description = "Supply current"

            [[channels]]
            name = "PS:VOLTAGE"
            reachable = false
        "#,
        )
        .unwrap();

        let client = SimClient::from_config(&config);
        assert_eq!(client.value("PS:CURRENT"), Some(12.5));
        assert_eq!(client.channel_names().len(), 2);
        assert_eq!(config.description_suffix, DEFAULT_DESCRIPTION_SUFFIX);
    }
}
