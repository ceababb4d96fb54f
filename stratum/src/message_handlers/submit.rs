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

use super::{ConnectionState, StratumContext};
use crate::error::{CODE_LOW_DIFFICULTY, Error};
use crate::messages::{Message, Request, Response, ResponseError, Share};
use tracing::debug;

/// Handle the "mining.submit" message
///
/// Hands the share to the validator and answers true when it meets the
/// session's difficulty.
///
/// Message format:
///
/// {"id": 1, "method": "mining.submit", "params": ["username", "jobid", "extranonce2", "nTime", "nonce"]}
/// Example message:
/// {"id": 1, "method": "mining.submit", "params": ["alice.rig1", "0000000000000002", "0000000000000001", "504e86ed", "e9695791"]}
pub(crate) async fn handle_submit(
    request: &Request,
    state: &mut ConnectionState,
    ctx: &StratumContext,
) -> Result<Vec<Message>, Error> {
    debug!("Handling mining.submit message");
    let session_id = state.session_id.ok_or(Error::NotSubscribed)?;
    let share = Share::read(request)?;

    let response = if ctx.validator.validate(session_id, share).await? {
        Response::boolean(request.id.clone(), true)
    } else {
        Response::reject(
            request.id.clone(),
            ResponseError::new(CODE_LOW_DIFFICULTY, "Low difficulty share"),
        )
    };
    Ok(vec![Message::Response(response)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_handlers::handle_message;
    use crate::message_handlers::tests::test_context;
    use crate::messages::submit::submit_request;
    use crate::messages::{Id, Method};
    use crate::work::job::JobId;
    use crate::work::validate::tests::genesis_job;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// A subscribed and authorized session whose extranonce1 fits the genesis coinbase.
    async fn genesis_session(
        difficulty: f64,
    ) -> (crate::message_handlers::tests::TestContext, ConnectionState, Request) {
        let test = test_context(0x04ffff00, difficulty);
        let mut state = ConnectionState::default();
        handle_message(
            Request::new(Id::Number(1), Method::Subscribe, vec![json!("UA")]),
            &mut state,
            &test.ctx,
        )
        .await;
        handle_message(
            Request::new(Id::Number(2), Method::Authorize, vec![json!("alice.rig1")]),
            &mut state,
            &test.ctx,
        )
        .await;

        let (job, _, share) = genesis_job(JobId(7));
        test.tracker.insert(Arc::new(job));
        let request = submit_request(
            Id::Number(4),
            &Share {
                worker_name: "alice.rig1".into(),
                job_id: JobId(7).to_string(),
                share,
            },
        );
        (test, state, request)
    }

    fn single_response(messages: &[Message]) -> &Response {
        match messages {
            [Message::Response(response)] => response,
            other => panic!("Expected a single response, got {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_handle_submit_meets_difficulty() {
        // Setup
        let (mut test, mut state, request) = genesis_session(1.0).await;

        // Execute
        let messages = handle_submit(&request, &mut state, &test.ctx).await.unwrap();

        // Verify
        let response = single_response(&messages);
        assert_eq!(response.id, Id::Number(4));
        assert_eq!(response.result, json!(true));
        let solution = tokio::time::timeout(Duration::from_secs(1), test.solutions_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(solution.worker_name, "alice.rig1");
    }

    #[test_log::test(tokio::test)]
    async fn test_handle_submit_low_difficulty() {
        let (test, mut state, request) = genesis_session(1e9).await;

        let messages = handle_submit(&request, &mut state, &test.ctx).await.unwrap();

        let response = single_response(&messages);
        assert_eq!(response.result, json!(false));
        assert_eq!(response.error.as_ref().unwrap().code, CODE_LOW_DIFFICULTY);
    }

    #[test_log::test(tokio::test)]
    async fn test_handle_submit_duplicate_answers_false_with_code() {
        let (test, mut state, request) = genesis_session(1.0).await;
        handle_message(request.clone(), &mut state, &test.ctx).await;

        let messages = handle_message(request, &mut state, &test.ctx).await;

        let response = single_response(&messages);
        assert_eq!(response.result, json!(false));
        assert_eq!(response.error.as_ref().unwrap().code, 22);
    }

    #[test_log::test(tokio::test)]
    async fn test_handle_submit_bad_params() {
        let (test, mut state, _) = genesis_session(1.0).await;
        let request = Request::new(Id::Number(5), Method::Submit, vec![json!("alice.rig1")]);

        let result = handle_submit(&request, &mut state, &test.ctx).await;

        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }
}
