use factory_core::deploy::{CloudPlatform, PollPolicy};
use factory_core::errors::ApplicationError;

use crate::tasks::CancelSignal;

/// Polls the app until its active deployment is live, returning the live URL.
///
/// Checks first and sleeps between attempts, so the last check is never followed by a
/// pointless wait. A failed status request ends the loop with that error.
pub async fn wait_until_live(
    cloud: &dyn CloudPlatform,
    app_id: &str,
    policy: PollPolicy,
    cancel: &mut CancelSignal,
) -> Result<String, ApplicationError> {
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(ApplicationError::Cancelled { app_id: Some(app_id.to_string()) });
        }

        let status = cloud.app_status(app_id).await?;
        tracing::debug!(
            event_name = "deploy.bridge.poll",
            app_id,
            attempt,
            phase = status.phase.as_deref().unwrap_or("unknown"),
            "checked app deployment status"
        );

        if let Some(url) = status.live_url() {
            return Ok(url.to_string());
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(policy.interval) => {}
                _ = cancel.cancelled() => {
                    return Err(ApplicationError::Cancelled { app_id: Some(app_id.to_string()) });
                }
            }
        }
    }

    Err(ApplicationError::ProvisioningTimeout {
        app_id: app_id.to_string(),
        attempts: policy.max_attempts,
    })
}
