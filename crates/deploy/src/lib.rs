//! Deployment orchestration for voice agents: the voice platform phase, the cloud bridge
//! phase, and the HTTP adapters for both platforms.

pub mod digitalocean;
pub mod elevenlabs;
pub mod fakes;
mod http;
pub mod orchestrator;
pub mod poller;
pub mod tasks;

pub use digitalocean::DigitalOceanClient;
pub use elevenlabs::ElevenLabsClient;
pub use orchestrator::{DeploySettings, DeploymentOrchestrator, RequestContext};
pub use poller::wait_until_live;
pub use tasks::{BridgeTasks, CancelSignal};
