//! Channel configuration.

use super::{Api, observe};
use crate::error::{ApiError, ApiResult};
use crate::handlers::server_query::channels_info;
use crate::telemetry::{OperationTimer, spans};
use channelstream_proto::api::InfoOptions;
use channelstream_proto::{ChannelConfigs, ChannelsInfo};
use tracing::info;

impl Api {
    /// Create or reconfigure channels.
    ///
    /// New channels take their entry from `configs`; existing channels have
    /// the entry applied on top of their current configuration.
    pub fn channel_config(&self, configs: ChannelConfigs) -> ApiResult<ChannelsInfo> {
        let _timer = OperationTimer::new("channel_config");
        let _span = spans::operation("channel_config", None).entered();
        observe("channel_config", self.channel_config_inner(configs))
    }

    fn channel_config_inner(&self, configs: ChannelConfigs) -> ApiResult<ChannelsInfo> {
        if configs.is_empty() {
            return Err(ApiError::invalid("no channels specified"));
        }

        let mut guard = self.store.lock();
        for (name, patch) in &configs {
            let existed = guard.channel(name).is_some();
            let chan = guard.get_or_create_channel(name, &configs);
            if existed {
                chan.reconfigure(patch);
            }
            info!(channel = %name, config = ?chan.config, "Channel configured");
        }
        let names: Vec<String> = configs.keys().cloned().collect();
        let opts = InfoOptions {
            include_history: false,
            include_users: false,
            ..Default::default()
        };
        Ok(channels_info(&guard, Some(&names), &opts))
    }
}
