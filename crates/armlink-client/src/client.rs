//! Cell-scoped entry point.

use std::sync::Arc;

use armlink_jogging::JoggingUrls;
use armlink_stream::{
    Connector, ReconnectPolicy, ReconnectingStream, RestScope, WsConnector, normalize_instance_url,
    to_websocket_url,
};
use armlink_types::ArmError;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::metadata::{MetadataSource, RestMetadataSource};
use crate::motion_group::ConnectedMotionGroup;

/// API version prefix below the instance URL.
pub const API_PREFIX: &str = "api/v2";

/// Handle on one cell of a service instance.
///
/// Cheap to clone; every clone shares the HTTP pool, the stream connector
/// and the metadata source.
#[derive(Clone)]
pub struct CellClient {
    config: Arc<ClientConfig>,
    instance: Url,
    rest: RestScope,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    metadata: Arc<dyn MetadataSource>,
}

impl std::fmt::Debug for CellClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellClient")
            .field("instance", &self.instance.as_str())
            .field("cell_id", &self.config.cell_id)
            .finish()
    }
}

impl CellClient {
    /// Build a client from `config`, talking WebSocket + REST to the
    /// configured instance.
    ///
    /// # Errors
    ///
    /// [`ArmError::Config`] if the instance URL or cell id is unusable.
    pub fn new(config: ClientConfig) -> Result<Self, ArmError> {
        if config.cell_id.is_empty() || config.cell_id.contains('/') {
            return Err(ArmError::Config(format!("invalid cell id '{}'", config.cell_id)));
        }
        let instance = normalize_instance_url(&config.instance_url)?;
        let cell_base = RestScope::new(instance.clone(), None)
            .url(&format!("{API_PREFIX}/cells/{}", config.cell_id))?;
        let rest = RestScope::new(cell_base, config.token().map(str::to_string));
        let metadata: Arc<dyn MetadataSource> = Arc::new(RestMetadataSource::new(rest.clone()));
        let policy = config.reconnect_policy();
        Ok(Self {
            config: Arc::new(config),
            instance,
            rest,
            connector: Arc::new(WsConnector),
            policy,
            metadata,
        })
    }

    /// Route every stream through `connector` with `policy`.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        self.connector = connector;
        self.policy = policy;
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataSource>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The normalised instance URL.
    pub fn instance_url(&self) -> &Url {
        &self.instance
    }

    pub fn cell_id(&self) -> &str {
        &self.config.cell_id
    }

    /// REST scope rooted at the cell.
    pub fn rest(&self) -> &RestScope {
        &self.rest
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataSource> {
        &self.metadata
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Stream URL for `path` below the cell: `http` becomes `ws`, `https`
    /// becomes `wss`, and the access token rides along as `token`.
    pub fn stream_url(&self, path: &str) -> Result<String, ArmError> {
        let mut url = to_websocket_url(&self.rest.url(path)?)?;
        if let Some(token) = self.config.token() {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.into())
    }

    /// Open a reconnecting stream to `path` below the cell.
    pub fn open_stream(&self, path: &str) -> Result<ReconnectingStream, ArmError> {
        let url = self.stream_url(path)?;
        debug!(path, "opening cell stream");
        Ok(ReconnectingStream::open_with(url, self.connector(), self.policy))
    }

    /// Telemetry stream path of a motion group.
    pub fn telemetry_path(controller: &str, motion_group: &str) -> String {
        format!("controllers/{controller}/motion-groups/{motion_group}/state-stream")
    }

    /// Jogging stream URLs of a motion group.
    pub fn jogging_urls(&self, motion_group: &str) -> Result<JoggingUrls, ArmError> {
        Ok(JoggingUrls {
            joint: self.stream_url(&format!("motion-groups/{motion_group}/jogging/joint"))?,
            cartesian: self.stream_url(&format!("motion-groups/{motion_group}/jogging/cartesian"))?,
        })
    }

    /// REST scope of a motion group's jogging resource.
    pub fn jogging_rest(&self, motion_group: &str) -> Result<RestScope, ArmError> {
        self.rest.scoped(&format!("motion-groups/{motion_group}/jogging"))
    }

    /// Connect to a motion group given as `"<index>@<controller>"`.
    pub async fn connect_motion_group(&self, motion_group: &str) -> Result<ConnectedMotionGroup, ArmError> {
        ConnectedMotionGroup::connect(self, motion_group).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(instance_url: &str, token: &str) -> CellClient {
        CellClient::new(ClientConfig {
            instance_url: instance_url.to_string(),
            cell_id: "cell".to_string(),
            access_token: token.to_string(),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn https_instance_maps_to_wss_with_token() {
        let client = client("https://nova.example.com", "t0k");
        assert_eq!(
            client
                .stream_url(&CellClient::telemetry_path("ur5e", "0@ur5e"))
                .unwrap(),
            "wss://nova.example.com/api/v2/cells/cell/controllers/ur5e/motion-groups/0@ur5e/state-stream?token=t0k"
        );
    }

    #[test]
    fn bare_host_with_port_maps_to_ws() {
        let client = client("192.168.1.10:8080", "");
        assert_eq!(client.instance_url().scheme(), "http");
        let urls = client.jogging_urls("0@ur5e").unwrap();
        assert_eq!(
            urls.joint,
            "ws://192.168.1.10:8080/api/v2/cells/cell/motion-groups/0@ur5e/jogging/joint"
        );
        assert!(urls.cartesian.ends_with("/jogging/cartesian"));
    }

    #[test]
    fn rest_is_scoped_to_the_cell() {
        let client = client("nova.example.com", "");
        assert_eq!(
            client.rest().base().as_str(),
            "https://nova.example.com/api/v2/cells/cell"
        );
        assert_eq!(
            client.jogging_rest("0@ur5e").unwrap().base().as_str(),
            "https://nova.example.com/api/v2/cells/cell/motion-groups/0@ur5e/jogging"
        );
    }

    #[test]
    fn invalid_cell_id_is_rejected() {
        let err = CellClient::new(ClientConfig {
            cell_id: "a/b".to_string(),
            ..ClientConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, ArmError::Config(_)));
    }

    #[test]
    fn debug_omits_token() {
        let client = client("https://nova.example.com", "secret-token");
        assert!(!format!("{client:?}").contains("secret-token"));
    }
}
