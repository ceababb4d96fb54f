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
use crate::messages::notify::notify;
use crate::messages::set_version_mask::set_version_mask;
use crate::messages::{AuthorizeParams, Message, Request, Response};
use tracing::{debug, info};

/// Handle the "mining.authorize" message
///
/// Marks the session authorized under the username, then pushes the version
/// rolling mask (when configured) and the latest job so the miner can start
/// working straight away.
///
/// A session authorizes once. Authorizing again with the same name is
/// accepted, another name is refused.
pub(crate) fn handle_authorize(
    request: &Request,
    state: &mut ConnectionState,
    ctx: &StratumContext,
) -> Result<Vec<Message>, Error> {
    debug!("Handling mining.authorize message");
    let session_id = state.session_id.ok_or(Error::NotSubscribed)?;
    let params = AuthorizeParams::read(request)?;
    if !ctx
        .registry
        .authorize(session_id, &params.username, params.password.as_deref())
    {
        info!("Session {session_id} failed to authorize as {}", params.username);
        return Err(Error::Unauthorized);
    }
    info!("Session {session_id} authorized as {}", params.username);

    let mut messages = vec![Message::Response(Response::boolean(request.id.clone(), true))];
    if let Some(mask) = ctx.version_mask {
        if ctx.registry.set_version_mask(session_id, mask) {
            messages.push(Message::Notification(set_version_mask(mask)));
        }
    }
    if let Some(job) = ctx.broadcaster.latest_job() {
        messages.push(Message::Notification(notify(&job.notify_params())));
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_handlers::subscribe::handle_subscribe;
    use crate::message_handlers::tests::test_context;
    use crate::messages::{Id, Method, NotifyParams, SetVersionMaskParams};
    use crate::work::template::tests::sample_template;
    use serde_json::json;

    fn subscribed(test: &crate::message_handlers::tests::TestContext) -> ConnectionState {
        let mut state = ConnectionState::default();
        let request = Request::new(Id::Number(1), Method::Subscribe, vec![json!("UA")]);
        handle_subscribe(&request, &mut state, &test.ctx).unwrap();
        state
    }

    fn authorize_request(username: &str) -> Request {
        Request::new(Id::Number(2), Method::Authorize, vec![json!(username), json!("x")])
    }

    #[test]
    fn test_handle_authorize_first_time() {
        // Setup
        let test = test_context(1, 1.0);
        let mut state = subscribed(&test);
        let job = test.ctx.broadcaster.new_job(&sample_template(), true).unwrap();

        // Execute
        let messages = handle_authorize(&authorize_request("worker1"), &mut state, &test.ctx).unwrap();

        // Verify
        let (response, mask, job_notify) = match &messages[..] {
            [
                Message::Response(response),
                Message::Notification(mask),
                Message::Notification(job_notify),
            ] => (response, mask, job_notify),
            other => panic!("Expected response, version mask and notify, got {other:?}"),
        };
        assert_eq!(response.id, Id::Number(2));
        assert_eq!(response.result, json!(true));
        assert!(response.error.is_none());
        assert_eq!(SetVersionMaskParams::read(mask).unwrap().mask, 0x1fffe000);
        assert_eq!(NotifyParams::read(job_notify).unwrap().job_id, job.id.to_string());

        let session = test.ctx.registry.get(state.session_id.unwrap()).unwrap();
        assert!(session.authorized);
        assert_eq!(session.name.as_deref(), Some("worker1"));
        assert_eq!(session.version_mask, Some(0x1fffe000));
    }

    #[test]
    fn test_handle_authorize_without_job_or_mask() {
        let mut test = test_context(1, 1.0);
        test.ctx.version_mask = None;
        let mut state = subscribed(&test);

        let messages = handle_authorize(&authorize_request("worker1"), &mut state, &test.ctx).unwrap();

        assert_eq!(messages.len(), 1);
        let session = test.ctx.registry.get(state.session_id.unwrap()).unwrap();
        assert_eq!(session.version_mask, None);
    }

    #[test]
    fn test_handle_authorize_other_name_refused() {
        // Setup
        let test = test_context(1, 1.0);
        let mut state = subscribed(&test);
        handle_authorize(&authorize_request("someusername"), &mut state, &test.ctx).unwrap();

        // Execute
        let result = handle_authorize(&authorize_request("worker1"), &mut state, &test.ctx);

        // Verify
        assert!(matches!(result, Err(Error::Unauthorized)));
        let session = test.ctx.registry.get(state.session_id.unwrap()).unwrap();
        assert_eq!(session.name.as_deref(), Some("someusername"));
    }

    #[test]
    fn test_handle_authorize_before_subscribe() {
        let test = test_context(1, 1.0);
        let mut state = ConnectionState::default();

        let result = handle_authorize(&authorize_request("worker1"), &mut state, &test.ctx);

        assert!(matches!(result, Err(Error::NotSubscribed)));
    }
}
