//! Named wrappers over [`RpcClient::call`] for the host operations every
//! embedded app uses.

use framecall_transport::Transport;
use serde_json::{Map, Value};

use crate::call::{CallContext, CallHandle, CallOptions};
use crate::client::RpcClient;

pub const GET_LOGGED_IN_USER_METHOD: &str = "getLoggedInUser";
pub const AJAX_METHOD: &str = "ajax";

impl<T: Transport> RpcClient<T> {
    /// Ask the host for the currently logged-in user.
    pub fn get_logged_in_user(&mut self, context: Option<CallContext>) -> CallHandle {
        self.call(
            GET_LOGGED_IN_USER_METHOD,
            Value::Object(Map::new()),
            with_context(context),
        )
    }

    /// Have the host perform an HTTP request on the app's behalf.
    ///
    /// `settings` is an object (or `null`) of request options passed through to the
    /// host. `url` is added to it and `type` is always `GET`; any other method is
    /// overwritten.
    pub fn ajax(&mut self, url: &str, settings: Value, context: Option<CallContext>) -> CallHandle {
        let settings = match settings {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let settings = match settings {
            Value::Object(mut map) => {
                map.insert("url".to_string(), Value::String(url.to_string()));
                map.insert("type".to_string(), Value::String("GET".to_string()));
                Value::Object(map)
            }
            // Left as-is so the call reports the invalid settings.
            other => other,
        };
        self.call(AJAX_METHOD, settings, with_context(context))
    }
}

fn with_context(context: Option<CallContext>) -> CallOptions {
    let options = CallOptions::expect_result();
    match context {
        Some(context) => options.with_context(context),
        None => options,
    }
}
