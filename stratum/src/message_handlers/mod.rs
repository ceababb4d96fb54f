// Copyright (C) 2024, 2025 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

use crate::difficulty_adjuster::DifficultyAdjusterTrait;
use crate::error::Error;
use crate::messages::{Message, Method, Request, Response, ResponseError};
use crate::session::SessionId;
use crate::session_registry::{SessionChannels, SessionRegistry};
use crate::share_validator::ShareValidator;
use crate::work::notify::JobBroadcaster;
use std::sync::Arc;
use tracing::debug;

pub mod authorize;
pub mod submit;
pub mod subscribe;

use authorize::handle_authorize;
use submit::handle_submit;
use subscribe::handle_subscribe;

/// Shared services every connection handler works with.
#[derive(Clone)]
pub(crate) struct StratumContext {
    pub registry: Arc<SessionRegistry>,
    pub broadcaster: Arc<JobBroadcaster>,
    pub validator: Arc<ShareValidator>,
    pub adjuster: Arc<dyn DifficultyAdjusterTrait>,
    /// Version rolling mask pushed to miners after authorize
    pub version_mask: Option<u32>,
}

/// Per-connection state the handlers update.
#[derive(Debug, Default)]
pub(crate) struct ConnectionState {
    /// Set by a successful subscribe
    pub session_id: Option<SessionId>,
    /// Channel ends from the registry, picked up by the connection loop
    pub channels: Option<SessionChannels>,
}

/// Handle incoming Stratum requests.
///
/// Returns the messages to write back, in order. A failed request is
/// answered with an error response and never closes the connection.
pub(crate) async fn handle_message(
    request: Request,
    state: &mut ConnectionState,
    ctx: &StratumContext,
) -> Vec<Message> {
    let result = match request.method {
        Method::Subscribe => handle_subscribe(&request, state, ctx),
        Method::Authorize => handle_authorize(&request, state, ctx),
        Method::Submit => handle_submit(&request, state, ctx).await,
        Method::Notify | Method::SetDifficulty | Method::SetVersionMask | Method::Unset => {
            Err(Error::InvalidMethod(request.method.to_string()))
        }
    };
    match result {
        Ok(messages) => messages,
        Err(e) => {
            debug!("Rejecting {} request {}: {e}", request.method, request.id);
            let error = ResponseError::from(&e);
            let response = match request.method {
                Method::Authorize | Method::Submit => Response::reject(request.id, error),
                _ => Response::error(request.id, error),
            };
            vec![Message::Response(response)]
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::difficulty_adjuster::{
        DifficultyAdjuster, RetargetConfig, DifficultyUpdateReceiver, create_difficulty_channel,
    };
    use crate::emission::{EmissionReceiver, SinkPolicy, create_emission_channel};
    use crate::messages::Id;
    use crate::share_validator::ShareValidatorConfig;
    use crate::work::tracker::JobTracker;
    use serde_json::json;
    use std::time::Duration;

    /// Context plus the receiving ends tests may want to inspect.
    pub(crate) struct TestContext {
        pub ctx: StratumContext,
        pub tracker: Arc<JobTracker>,
        pub solutions_rx: EmissionReceiver,
        pub updates_rx: DifficultyUpdateReceiver,
    }

    pub(crate) fn test_context(first_session_id: u32, start_difficulty: f64) -> TestContext {
        let registry = Arc::new(SessionRegistry::with_first_id(
            first_session_id,
            8,
            start_difficulty,
            None,
        ));
        let tracker = Arc::new(JobTracker::new(8, Duration::from_secs(5)));
        let broadcaster = Arc::new(JobBroadcaster::new(tracker.clone(), registry.clone()));
        let (updates_tx, updates_rx) = create_difficulty_channel(8);
        let adjuster: Arc<dyn DifficultyAdjusterTrait> = Arc::new(DifficultyAdjuster::new(
            RetargetConfig {
                window_size: 4,
                target_interval: Duration::from_secs(10),
                minimum_difficulty: 1e-12,
                maximum_difficulty: 1e12,
            },
            updates_tx,
        ));
        let (solutions_tx, solutions_rx) = create_emission_channel(8);
        let validator = Arc::new(ShareValidator::new(
            ShareValidatorConfig {
                max_workers: 2,
                submission_timeout: Duration::from_millis(200),
                sink_policy: SinkPolicy::Drop,
            },
            registry.clone(),
            tracker.clone(),
            adjuster.clone(),
            solutions_tx,
        ));
        TestContext {
            ctx: StratumContext {
                registry,
                broadcaster,
                validator,
                adjuster,
                version_mask: Some(0x1fffe000),
            },
            tracker,
            solutions_rx,
            updates_rx,
        }
    }

    #[tokio::test]
    async fn test_server_to_client_method_gets_error_response() {
        // Setup
        let test = test_context(1, 1.0);
        let mut state = ConnectionState::default();
        let request = Request::new(Id::Number(3), Method::SetDifficulty, vec![json!(2)]);

        // Execute
        let messages = handle_message(request, &mut state, &test.ctx).await;

        // Verify
        match &messages[..] {
            [Message::Response(response)] => {
                assert_eq!(response.id, Id::Number(3));
                assert!(response.result.is_null());
                assert_eq!(response.error.as_ref().unwrap().code, 20);
            }
            other => panic!("Expected a single response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_before_subscribe_is_rejected() {
        let test = test_context(1, 1.0);
        let mut state = ConnectionState::default();
        let request = Request::new(
            Id::Number(4),
            Method::Submit,
            vec![
                json!("alice"),
                json!("0000000000000001"),
                json!("0000000000000001"),
                json!("00001234"),
                json!("00005678"),
            ],
        );

        let messages = handle_message(request, &mut state, &test.ctx).await;

        match &messages[..] {
            [Message::Response(response)] => {
                assert_eq!(response.result, json!(false));
                assert_eq!(response.error.as_ref().unwrap().code, 25);
            }
            other => panic!("Expected a single response, got {other:?}"),
        }
    }
}
