//! Motion-group metadata collaborator.
//!
//! Everything [`ConnectedMotionGroup`][crate::ConnectedMotionGroup] needs
//! besides telemetry comes through [`MetadataSource`]: the controller
//! inventory, the virtual-controller probe, tool frames, kinematics and
//! safety zones.  [`RestMetadataSource`] answers from the cell-scoped REST
//! API; tests and embedded deployments provide their own.

use std::collections::HashMap;

use armlink_stream::RestScope;
use armlink_types::{
    ArmError, ControllerInfo, KinematicDescription, MotionGroupInfo, RobotTcp, SafetyZone,
};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::Deserialize;

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Every controller of the cell with its motion groups.
    async fn controllers(&self) -> Result<Vec<ControllerInfo>, ArmError>;

    /// Operation mode of a virtual controller.
    ///
    /// Physical controllers answer with an HTTP failure
    /// ([`ArmError::is_service_response`]) or `Ok(None)`.
    async fn virtual_operation_mode(&self, controller: &str) -> Result<Option<String>, ArmError>;

    async fn tcps(&self, controller: &str, motion_group: &str) -> Result<Vec<RobotTcp>, ArmError>;

    async fn kinematics(
        &self,
        controller: &str,
        motion_group: &str,
    ) -> Result<KinematicDescription, ArmError>;

    async fn safety_zones(
        &self,
        controller: &str,
        motion_group: &str,
    ) -> Result<Vec<SafetyZone>, ArmError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// REST implementation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TcpList {
    #[serde(default)]
    tcps: Vec<RobotTcp>,
}

#[derive(Deserialize)]
struct SafetySetup {
    #[serde(default)]
    safety_zones: Vec<SafetyZone>,
}

#[derive(Deserialize)]
struct OperationMode {
    #[serde(default)]
    operation_mode: Option<String>,
}

/// [`MetadataSource`] over the REST API of one cell.
///
/// | Call | Resource |
/// |---|---|
/// | `controllers` | `GET controllers`, then `GET controllers/{c}/state` each |
/// | `virtual_operation_mode` | `GET controllers/{c}/virtual-controller/operation-mode` |
/// | `tcps` | `GET controllers/{c}/motion-groups/{g}/tcps` |
/// | `kinematics` | `GET controllers/{c}/motion-groups/{g}/description` |
/// | `safety_zones` | `GET controllers/{c}/motion-groups/{g}/safety-setup` |
#[derive(Debug, Clone)]
pub struct RestMetadataSource {
    rest: RestScope,
}

impl RestMetadataSource {
    /// `rest` must be scoped to the cell.
    pub fn new(rest: RestScope) -> Self {
        Self { rest }
    }

    fn group_path(controller: &str, motion_group: &str, resource: &str) -> String {
        format!("controllers/{controller}/motion-groups/{motion_group}/{resource}")
    }
}

#[async_trait]
impl MetadataSource for RestMetadataSource {
    async fn controllers(&self) -> Result<Vec<ControllerInfo>, ArmError> {
        let names: Vec<String> = self.rest.get_json("controllers").await?;
        try_join_all(names.iter().map(|name| async move {
            self.rest
                .get_json::<ControllerInfo>(&format!("controllers/{name}/state"))
                .await
        }))
        .await
    }

    async fn virtual_operation_mode(&self, controller: &str) -> Result<Option<String>, ArmError> {
        let mode: OperationMode = self
            .rest
            .get_json(&format!("controllers/{controller}/virtual-controller/operation-mode"))
            .await?;
        Ok(mode.operation_mode)
    }

    async fn tcps(&self, controller: &str, motion_group: &str) -> Result<Vec<RobotTcp>, ArmError> {
        let list: TcpList = self
            .rest
            .get_json(&Self::group_path(controller, motion_group, "tcps"))
            .await?;
        Ok(list.tcps)
    }

    async fn kinematics(
        &self,
        controller: &str,
        motion_group: &str,
    ) -> Result<KinematicDescription, ArmError> {
        self.rest
            .get_json(&Self::group_path(controller, motion_group, "description"))
            .await
    }

    async fn safety_zones(
        &self,
        controller: &str,
        motion_group: &str,
    ) -> Result<Vec<SafetyZone>, ArmError> {
        let setup: SafetySetup = self
            .rest
            .get_json(&Self::group_path(controller, motion_group, "safety-setup"))
            .await?;
        Ok(setup.safety_zones)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Per-group static data held by [`StaticMetadataSource`].
#[derive(Debug, Clone, Default)]
pub struct GroupMetadata {
    pub tcps: Vec<RobotTcp>,
    pub kinematics: KinematicDescription,
    pub safety_zones: Vec<SafetyZone>,
}

/// [`MetadataSource`] answering from memory.  Used when the service is
/// embedded in the same process and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataSource {
    controllers: Vec<ControllerInfo>,
    virtual_controllers: Vec<String>,
    groups: HashMap<String, GroupMetadata>,
}

impl StaticMetadataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `motion_group` under `controller`.
    pub fn with_motion_group(
        mut self,
        controller: &str,
        motion_group: &str,
        metadata: GroupMetadata,
    ) -> Self {
        let info = MotionGroupInfo {
            motion_group: motion_group.to_string(),
            name: None,
            model_from_controller: metadata.kinematics.motion_group_model.clone(),
        };
        match self.controllers.iter_mut().find(|c| c.controller == controller) {
            Some(existing) => existing.motion_groups.push(info),
            None => self.controllers.push(ControllerInfo {
                controller: controller.to_string(),
                motion_groups: vec![info],
            }),
        }
        self.groups.insert(motion_group.to_string(), metadata);
        self
    }

    /// Mark `controller` as virtual.
    pub fn with_virtual_controller(mut self, controller: &str) -> Self {
        self.virtual_controllers.push(controller.to_string());
        self
    }

    fn group(&self, motion_group: &str) -> Result<&GroupMetadata, ArmError> {
        self.groups.get(motion_group).ok_or_else(|| ArmError::NotFound {
            kind: "motion group".to_string(),
            id: motion_group.to_string(),
        })
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    async fn controllers(&self) -> Result<Vec<ControllerInfo>, ArmError> {
        Ok(self.controllers.clone())
    }

    async fn virtual_operation_mode(&self, controller: &str) -> Result<Option<String>, ArmError> {
        if self.virtual_controllers.iter().any(|c| c == controller) {
            Ok(Some("OPERATION_MODE_AUTO".to_string()))
        } else {
            Err(ArmError::Unsupported(format!("'{controller}' is not a virtual controller")))
        }
    }

    async fn tcps(&self, _controller: &str, motion_group: &str) -> Result<Vec<RobotTcp>, ArmError> {
        Ok(self.group(motion_group)?.tcps.clone())
    }

    async fn kinematics(
        &self,
        _controller: &str,
        motion_group: &str,
    ) -> Result<KinematicDescription, ArmError> {
        Ok(self.group(motion_group)?.kinematics.clone())
    }

    async fn safety_zones(
        &self,
        _controller: &str,
        motion_group: &str,
    ) -> Result<Vec<SafetyZone>, ArmError> {
        Ok(self.group(motion_group)?.safety_zones.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CELL: &str = "/api/v2/cells/cell";

    async fn mount(server: &MockServer, resource: &str, status: u16, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("{CELL}/{resource}")))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    fn source(server: &MockServer) -> RestMetadataSource {
        let base = Url::parse(&format!("{}{CELL}", server.uri())).unwrap();
        RestMetadataSource::new(RestScope::new(base, None))
    }

    #[tokio::test]
    async fn controllers_are_resolved_with_their_motion_groups() {
        let server = MockServer::start().await;
        mount(&server, "controllers", 200, json!(["mock-ur5e"])).await;
        mount(
            &server,
            "controllers/mock-ur5e/state",
            200,
            json!({
                "controller": "mock-ur5e",
                "mode": "MODE_CONTROL",
                "motion_groups": [{"motion_group": "0@mock-ur5e", "controller": "mock-ur5e"}]
            }),
        )
        .await;

        let controllers = source(&server).controllers().await.unwrap();
        assert_eq!(controllers.len(), 1);
        assert_eq!(controllers[0].controller, "mock-ur5e");
        assert_eq!(controllers[0].motion_groups[0].motion_group, "0@mock-ur5e");
    }

    #[tokio::test]
    async fn description_yields_kinematics() {
        let server = MockServer::start().await;
        mount(
            &server,
            "controllers/mock-ur5e/motion-groups/0@mock-ur5e/description",
            200,
            json!({
                "motion_group_model": "UniversalRobots_UR5e",
                "cycle_time": 8,
                "dh_parameters": [{"alpha": 1.5707963267948966, "d": 162.25}, {"a": -425}],
                "payloads": {}
            }),
        )
        .await;

        let kinematics = source(&server).kinematics("mock-ur5e", "0@mock-ur5e").await.unwrap();
        assert_eq!(kinematics.motion_group_model.as_deref(), Some("UniversalRobots_UR5e"));
        assert_eq!(kinematics.dh_parameters.len(), 2);
        assert_eq!(kinematics.dh_parameters[1].a, -425.0);
        assert_eq!(kinematics.cycle_time, Some(8));
    }

    #[tokio::test]
    async fn tcps_and_safety_zones_are_unwrapped() {
        let server = MockServer::start().await;
        mount(
            &server,
            "controllers/c/motion-groups/0@c/tcps",
            200,
            json!({"tcps": [{"id": "Flange", "pose": {"position": [0, 0, 0], "orientation": [0, 0, 0]}}]}),
        )
        .await;
        mount(
            &server,
            "controllers/c/motion-groups/0@c/safety-setup",
            200,
            json!({"safety_zones": [{"id": 1, "priority": 0, "geometry": {"type": "sphere"}}]}),
        )
        .await;

        let source = source(&server);
        let tcps = source.tcps("c", "0@c").await.unwrap();
        assert_eq!(tcps[0].id, "Flange");
        let zones = source.safety_zones("c", "0@c").await.unwrap();
        assert_eq!(zones[0].id, 1);
        assert_eq!(zones[0].geometry["type"], "sphere");
    }

    #[tokio::test]
    async fn virtual_probe_distinguishes_answers() {
        let server = MockServer::start().await;
        mount(
            &server,
            "controllers/virtual/virtual-controller/operation-mode",
            200,
            json!({"operation_mode": "OPERATION_MODE_AUTO"}),
        )
        .await;
        mount(
            &server,
            "controllers/physical/virtual-controller/operation-mode",
            404,
            json!({"detail": "not a virtual controller"}),
        )
        .await;

        let source = source(&server);
        assert_eq!(
            source.virtual_operation_mode("virtual").await.unwrap().as_deref(),
            Some("OPERATION_MODE_AUTO")
        );
        let err = source.virtual_operation_mode("physical").await.unwrap_err();
        assert!(err.is_service_response(), "{err:?}");
    }

    #[tokio::test]
    async fn static_source_groups_motion_groups_by_controller() {
        let source = StaticMetadataSource::new()
            .with_motion_group("ur", "0@ur", GroupMetadata::default())
            .with_motion_group("ur", "1@ur", GroupMetadata::default())
            .with_virtual_controller("ur");

        let controllers = source.controllers().await.unwrap();
        assert_eq!(controllers.len(), 1);
        assert_eq!(controllers[0].motion_groups.len(), 2);
        assert!(source.virtual_operation_mode("ur").await.unwrap().is_some());
        assert!(source.virtual_operation_mode("kuka").await.unwrap_err().is_service_response());
        assert!(matches!(
            source.tcps("ur", "2@ur").await,
            Err(ArmError::NotFound { .. })
        ));
    }
}
