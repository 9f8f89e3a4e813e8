//! PTZ device control: the continuous-motion command vocabulary and the
//! narrow asynchronous interface the gesture engine drives.
//!
//! The camera accepts a continuous-motion vector and a stop command. Both may
//! fail independently; failures are logged by the caller and never escalated
//! past it — a camera that cannot physically move must not wedge the
//! orchestrator.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::debug;

/// Continuous-motion vector. All axes are clamped to [-1, 1] at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionVector {
    pub pan: f32,
    pub tilt: f32,
    pub zoom: f32,
}

impl MotionVector {
    pub const NEUTRAL: MotionVector = MotionVector {
        pan: 0.0,
        tilt: 0.0,
        zoom: 0.0,
    };

    pub fn new(pan: f32, tilt: f32, zoom: f32) -> Self {
        Self {
            pan: pan.clamp(-1.0, 1.0),
            tilt: tilt.clamp(-1.0, 1.0),
            zoom: zoom.clamp(-1.0, 1.0),
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.pan == 0.0 && self.tilt == 0.0 && self.zoom == 0.0
    }
}

/// Asynchronous PTZ control surface.
#[async_trait]
pub trait PtzDevice: Send + Sync {
    /// Start continuous motion along `vector` until `stop` is called.
    async fn move_continuous(&self, vector: MotionVector) -> CoreResult<()>;

    /// Halt all axes.
    async fn stop(&self) -> CoreResult<()>;
}

/// ONVIF PTZ service client. Sends fixed ContinuousMove/Stop envelopes to the
/// device's PTZ endpoint; only the HTTP status is inspected — response
/// parsing belongs to a full ONVIF stack, not here.
pub struct OnvifPtz {
    client: reqwest::Client,
    endpoint: String,
    profile_token: String,
}

impl OnvifPtz {
    pub fn new(
        endpoint: impl Into<String>,
        profile_token: impl Into<String>,
    ) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            profile_token: profile_token.into(),
        })
    }

    async fn post_soap(&self, body: String) -> CoreResult<()> {
        let res = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .body(body)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(CoreError::TransientIo(format!(
                "PTZ endpoint returned {}",
                res.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PtzDevice for OnvifPtz {
    async fn move_continuous(&self, vector: MotionVector) -> CoreResult<()> {
        debug!(pan = vector.pan, tilt = vector.tilt, zoom = vector.zoom, "ContinuousMove");
        let body = format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><ContinuousMove xmlns="http://www.onvif.org/ver20/ptz/wsdl"><ProfileToken>{}</ProfileToken><Velocity><PanTilt x="{}" y="{}" xmlns="http://www.onvif.org/ver10/schema"/><Zoom x="{}" xmlns="http://www.onvif.org/ver10/schema"/></Velocity></ContinuousMove></s:Body></s:Envelope>"#,
            self.profile_token, vector.pan, vector.tilt, vector.zoom
        );
        self.post_soap(body).await
    }

    async fn stop(&self) -> CoreResult<()> {
        debug!("Stop");
        let body = format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><Stop xmlns="http://www.onvif.org/ver20/ptz/wsdl"><ProfileToken>{}</ProfileToken><PanTilt>true</PanTilt><Zoom>true</Zoom></Stop></s:Body></s:Envelope>"#,
            self.profile_token
        );
        self.post_soap(body).await
    }
}

/// A command as seen by the scripted device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Move(MotionVector),
    Stop,
}

/// In-memory device double: records every command and optionally fails all of
/// them. Use to assert command order without hardware.
#[derive(Default)]
pub struct ScriptedPtz {
    commands: Mutex<Vec<DeviceCommand>>,
    fail_all: bool,
}

impl ScriptedPtz {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command errors, but is still recorded.
    pub fn failing() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            fail_all: true,
        }
    }

    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl PtzDevice for ScriptedPtz {
    async fn move_continuous(&self, vector: MotionVector) -> CoreResult<()> {
        self.commands
            .lock()
            .unwrap()
            .push(DeviceCommand::Move(vector));
        if self.fail_all {
            Err(CoreError::TransientIo("scripted move failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn stop(&self) -> CoreResult<()> {
        self.commands.lock().unwrap().push(DeviceCommand::Stop);
        if self.fail_all {
            Err(CoreError::TransientIo("scripted stop failure".to_string()))
        } else {
            Ok(())
        }
    }
}
