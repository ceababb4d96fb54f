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
use crate::error::Error;
use crate::messages::set_difficulty::set_difficulty;
use crate::messages::subscribe::subscribe_response;
use crate::messages::{Message, Method, Request, SubscribeParams, SubscribeResult};
use std::time::SystemTime;
use tracing::debug;

/// Handle the "mining.subscribe" message
///
/// Registers a session, answers with the subscriptions, extranonce1 and
/// extranonce2 size, then sends the session's starting difficulty.
///
/// Message format:
/// {"id": 1, "method": "mining.subscribe", "params": ["cgminer/4.11.1"]}
///
/// A session id passed for resumption is accepted on the wire but a fresh
/// session is always created.
pub(crate) fn handle_subscribe(
    request: &Request,
    state: &mut ConnectionState,
    ctx: &StratumContext,
) -> Result<Vec<Message>, Error> {
    debug!("Handling mining.subscribe message");
    if state.session_id.is_some() {
        return Err(Error::ProtocolViolation {
            id: Some(request.id.clone()),
            reason: "already subscribed".into(),
        });
    }
    let params = SubscribeParams::read(request)?;
    let (session, channels) = ctx.registry.register(&params.user_agent, SystemTime::now())?;

    let result = SubscribeResult {
        subscriptions: vec![
            (Method::SetDifficulty, session.id),
            (Method::Notify, session.id),
        ],
        extranonce1: session.id,
        extranonce2_size: session.extranonce2_size,
    };
    let response = subscribe_response(request.id.clone(), &result)?;

    state.session_id = Some(session.id);
    state.channels = Some(channels);
    Ok(vec![
        Message::Response(response),
        Message::Notification(set_difficulty(session.current_difficulty)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_handlers::tests::test_context;
    use crate::messages::{Id, SetDifficultyParams};
    use crate::session::SessionId;
    use serde_json::json;

    #[test]
    fn test_handle_subscribe_success() {
        // Setup
        let test = test_context(0x2a, 16.0);
        let mut state = ConnectionState::default();
        let request = Request::new(Id::Number(1), Method::Subscribe, vec![json!("cgminer/4.11.1")]);

        // Execute
        let messages = handle_subscribe(&request, &mut state, &test.ctx).unwrap();

        // Verify
        let (response, difficulty) = match &messages[..] {
            [Message::Response(response), Message::Notification(difficulty)] => {
                (response, difficulty)
            }
            other => panic!("Expected a response and a notification, got {other:?}"),
        };
        assert_eq!(response.id, Id::Number(1));
        assert_eq!(
            response.result,
            json!([
                [
                    ["mining.set_difficulty", "0000002a"],
                    ["mining.notify", "0000002a"]
                ],
                "0000002a",
                8
            ])
        );
        assert_eq!(SetDifficultyParams::read(difficulty).unwrap().difficulty, 16.0);

        assert_eq!(state.session_id, Some(SessionId(0x2a)));
        assert!(state.channels.is_some());
        let session = test.ctx.registry.get(SessionId(0x2a)).unwrap();
        assert_eq!(session.user_agent, "cgminer/4.11.1");
        assert!(!session.authorized);
    }

    #[test]
    fn test_handle_subscribe_already_subscribed() {
        let test = test_context(1, 1.0);
        let mut state = ConnectionState::default();
        let request = Request::new(Id::Number(1), Method::Subscribe, vec![json!("UA")]);
        handle_subscribe(&request, &mut state, &test.ctx).unwrap();

        let second = handle_subscribe(&request, &mut state, &test.ctx);

        assert!(matches!(second, Err(Error::ProtocolViolation { .. })));
        assert_eq!(test.ctx.registry.len(), 1);
    }

    #[test]
    fn test_handle_subscribe_bad_params_registers_nothing() {
        let test = test_context(1, 1.0);
        let mut state = ConnectionState::default();
        let request = Request::new(Id::Number(1), Method::Subscribe, vec![json!(7)]);

        let result = handle_subscribe(&request, &mut state, &test.ctx);

        assert!(result.is_err());
        assert!(state.session_id.is_none());
        assert!(test.ctx.registry.is_empty());
    }
}
