use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framecall_client::signed_request;
use framecall_client::{
    ClientError, HostEndpoint, Served, AJAX_METHOD, GET_LOGGED_IN_USER_METHOD, HANDSHAKE_METHOD,
    SIGNED_REQUEST_KEY,
};
use framecall_frame::{Envelope, RemoteError};
use framecall_transport::{TransportError, UnixDomainSocket};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cmd::HostArgs;
use crate::exit::{client_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_served, OutputFormat, ServedReport};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Error codes the demo host answers with.
const UNAUTHORIZED: i64 = 401;
const NOT_FOUND: i64 = 404;

pub fn run(args: HostArgs, format: OutputFormat) -> CliResult<i32> {
    let listener =
        UnixDomainSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let responder = DemoHost::new(&args);
    let mut served = 0usize;

    while running.load(Ordering::SeqCst) {
        let transport = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        let mut endpoint = HostEndpoint::new(transport);
        info!("embedded client connected");

        while running.load(Ordering::SeqCst) {
            let mut report = None;
            let outcome = endpoint.serve_next(POLL_INTERVAL, |request| {
                let outcome = responder.respond(request);
                report = Some((
                    request.method.clone(),
                    request.call_id.as_ref().map(|id| id.to_string()),
                    request.app_id.clone(),
                ));
                outcome
            });

            let reply_code = match outcome {
                Ok(Served::Replied(reply)) => reply.error.map(|err| err.code),
                Ok(Served::Notified { .. }) => None,
                Ok(Served::Idle | Served::Ignored) => continue,
                Err(ClientError::Transport(TransportError::Disconnected)) => {
                    info!("embedded client disconnected");
                    break;
                }
                Err(err) => return Err(client_error("serve failed", err)),
            };

            if let Some((method, call_id, app_id)) = &report {
                print_served(
                    &ServedReport {
                        method,
                        call_id: call_id.as_deref(),
                        app_id,
                        code: reply_code,
                        timestamp: crate::output::now_unix_seconds(),
                    },
                    format,
                );
            }

            served = served.saturating_add(1);
            if args.count.is_some_and(|count| served >= count) {
                return Ok(SUCCESS);
            }
        }
    }

    Ok(SUCCESS)
}

/// Answers the methods the demo host knows.
struct DemoHost {
    secret: Option<String>,
    token: String,
    consumer_secret: Option<String>,
}

impl DemoHost {
    fn new(args: &HostArgs) -> Self {
        Self {
            secret: args.secret.clone(),
            token: args.token.clone(),
            consumer_secret: args.consumer_secret.clone(),
        }
    }

    fn respond(&self, request: &Envelope) -> Result<Value, RemoteError> {
        if request.method == HANDSHAKE_METHOD {
            return self.handshake(request);
        }
        self.authorize(request)?;
        match request.method.as_str() {
            GET_LOGGED_IN_USER_METHOD => Ok(json!({
                "EID": "demo-user",
                "fullName": "Demo User",
                "appId": request.app_id,
            })),
            AJAX_METHOD => Ok(json!({
                "url": request.settings.get("url").cloned().unwrap_or(Value::Null),
                "type": request.settings.get("type").cloned().unwrap_or(Value::Null),
                "settings": request.settings,
            })),
            other => Err(RemoteError::new(
                NOT_FOUND,
                format!("unknown method '{other}'"),
            )),
        }
    }

    fn handshake(&self, request: &Envelope) -> Result<Value, RemoteError> {
        let credential = request
            .settings
            .get(SIGNED_REQUEST_KEY)
            .and_then(Value::as_str)
            .filter(|credential| !credential.is_empty())
            .ok_or_else(|| RemoteError::new(UNAUTHORIZED, "missing signed request"))?;

        if let Some(secret) = &self.secret {
            signed_request::verify_query(credential, secret)
                .map_err(|err| RemoteError::new(UNAUTHORIZED, err.to_string()))?;
        }
        debug!("handshake accepted");
        Ok(json!({ "token": self.token }))
    }

    fn authorize(&self, request: &Envelope) -> Result<(), RemoteError> {
        if let Some(expected) = &self.consumer_secret {
            if request.consumer_secret.as_deref() != Some(expected.as_str()) {
                return Err(RemoteError::new(UNAUTHORIZED, "invalid consumer secret"));
            }
            return Ok(());
        }
        // Token-less requests are allowed; a wrong token is not.
        match request.token.as_deref() {
            Some(token) if !token.is_empty() && token != self.token => {
                Err(RemoteError::new(UNAUTHORIZED, "invalid token"))
            }
            _ => Ok(()),
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use framecall_frame::CallId;
    use serde_json::Map;

    use super::*;

    fn demo(secret: Option<&str>, consumer_secret: Option<&str>) -> DemoHost {
        DemoHost::new(&HostArgs {
            path: PathBuf::from("/tmp/unused.sock"),
            secret: secret.map(str::to_string),
            token: "tok".to_string(),
            consumer_secret: consumer_secret.map(str::to_string),
            count: None,
        })
    }

    fn handshake_request(credential: &str) -> Envelope {
        let mut settings = Map::new();
        settings.insert(SIGNED_REQUEST_KEY.to_string(), json!(credential));
        Envelope::request("app", HANDSHAKE_METHOD, settings).with_call_id(CallId::new("c0"))
    }

    #[test]
    fn handshake_checks_signature_when_secret_set() {
        let params = BTreeMap::from([("userEID".to_string(), "u-1".to_string())]);
        let good = signed_request::signed_request(&params, "s3cret").unwrap();
        let bad = signed_request::signed_request(&params, "other").unwrap();

        let host = demo(Some("s3cret"), None);
        assert_eq!(
            host.respond(&handshake_request(&good)).unwrap(),
            json!({"token": "tok"})
        );
        assert_eq!(
            host.respond(&handshake_request(&bad)).unwrap_err().code,
            UNAUTHORIZED
        );
        assert_eq!(
            demo(None, None)
                .respond(&handshake_request(""))
                .unwrap_err()
                .code,
            UNAUTHORIZED
        );
    }

    #[test]
    fn methods_and_authorization() {
        let host = demo(None, None);
        let user = Envelope::request("app", GET_LOGGED_IN_USER_METHOD, Map::new()).with_token("tok");
        assert_eq!(host.respond(&user).unwrap()["EID"], json!("demo-user"));

        let wrong = Envelope::request("app", GET_LOGGED_IN_USER_METHOD, Map::new()).with_token("nope");
        assert_eq!(host.respond(&wrong).unwrap_err().code, UNAUTHORIZED);

        let unknown = Envelope::request("app", "launchRockets", Map::new());
        assert_eq!(host.respond(&unknown).unwrap_err().code, NOT_FOUND);

        let legacy = demo(None, Some("shared"));
        let missing = Envelope::request("app", GET_LOGGED_IN_USER_METHOD, Map::new());
        assert_eq!(legacy.respond(&missing).unwrap_err().code, UNAUTHORIZED);
        assert!(legacy
            .respond(&missing.clone().with_consumer_secret("shared"))
            .is_ok());
    }
}
