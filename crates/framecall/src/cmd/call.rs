use framecall_client::signed_request::{self, Params};
use framecall_client::{AuthStrategy, CallOptions, ClientConfig, RpcClient};
use framecall_transport::UnixDomainSocket;
use serde_json::Value;
use tracing::debug;

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{
    client_error, signature_error, transport_error, CliError, CliResult, SUCCESS, USAGE,
};
use crate::output::{print_call, CallReport, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let data = resolve_data(&args)?;
    let auth = resolve_auth(&args)?;

    let transport = UnixDomainSocket::connect(&args.path)
        .map_err(|err| transport_error("connect failed", err))?;
    let config = ClientConfig::new(args.app_id.clone()).with_auth(auth);
    let mut client =
        RpcClient::new(transport, config).map_err(|err| client_error("invalid config", err))?;

    client
        .wait_authenticated(timeout)
        .map_err(|err| client_error("handshake failed", err))?;
    debug!(state = %client.handshake_state(), "ready to call");

    let options = if args.no_wait {
        CallOptions::notify()
    } else {
        CallOptions::expect_result()
    };
    let mut handle = client.call(&args.method, data, options);
    let outcome = client.run_until_settled(&mut handle, timeout);
    let call_id = handle.id().map(|id| id.to_string());

    let result = outcome.map_err(|err| client_error("call failed", err))?;
    let mut report = CallReport::new(&args.method, call_id.as_deref(), &args.app_id);
    report.handshake = client.handshake_state().to_string();
    if !args.no_wait {
        report.result = Some(result);
    }
    print_call(&report, format);

    client
        .shutdown()
        .map_err(|err| client_error("shutdown failed", err))?;
    Ok(SUCCESS)
}

fn resolve_data(args: &CallArgs) -> CliResult<Value> {
    let Some(json) = &args.json else {
        return Ok(Value::Null);
    };
    let data: Value = serde_json::from_str(json)
        .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
    if !data.is_object() {
        return Err(CliError::new(USAGE, "--json must be a JSON object"));
    }
    Ok(data)
}

fn resolve_auth(args: &CallArgs) -> CliResult<AuthStrategy> {
    if let Some(signed) = &args.signed_request {
        return Ok(AuthStrategy::SignedRequest(signed.clone()));
    }
    if let Some(secret) = &args.secret {
        let params: Params = args.params.iter().cloned().collect();
        let signed = signed_request::signed_request(&params, secret)
            .map_err(|err| signature_error("signing failed", err))?;
        return Ok(AuthStrategy::SignedRequest(signed));
    }
    if let Some(secret) = &args.consumer_secret {
        return Ok(AuthStrategy::ConsumerSecret(secret.clone()));
    }
    Ok(AuthStrategy::Anonymous)
}
