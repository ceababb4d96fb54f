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

use super::{Id, Method, Request, check_arity, str_param};
use crate::error::Error;
use serde_json::{Value, json};

/// Params of a `mining.authorize` request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizeParams {
    pub username: String,
    pub password: Option<String>,
}

impl AuthorizeParams {
    pub fn read(request: &Request) -> Result<Self, Error> {
        check_arity(&request.params, 1, 2, Method::Authorize)?;
        let username = str_param(&request.params, 0, "username")?.to_string();
        let password = match request.params.get(1) {
            None | Some(Value::Null) => None,
            Some(_) => Some(str_param(&request.params, 1, "password")?.to_string()),
        };
        Ok(Self { username, password })
    }
}

/// Build a `mining.authorize` request.
pub fn authorize_request(id: Id, params: &AuthorizeParams) -> Request {
    let mut values = vec![json!(params.username)];
    if let Some(password) = &params.password {
        values.push(json!(password));
    }
    Request::new(id, Method::Authorize, values)
}
