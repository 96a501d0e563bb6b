use framecall_client::signed_request::{self, Params, SIGNATURE_PARAM};

use crate::cmd::SignArgs;
use crate::exit::{signature_error, CliResult, SUCCESS};
use crate::output::{print_fields, OutputFormat};

pub fn run(args: SignArgs, format: OutputFormat) -> CliResult<i32> {
    if let Some(query) = &args.verify {
        let params = signed_request::verify_query(query, &args.secret)
            .map_err(|err| signature_error("verification failed", err))?;
        print_fields(
            &[
                ("status", "valid".to_string()),
                ("canonicalQuery", signed_request::canonical_query(&params)),
            ],
            format,
        );
        return Ok(SUCCESS);
    }

    let params: Params = args.params.into_iter().collect();
    let signed = signed_request::signed_request(&params, &args.secret)
        .map_err(|err| signature_error("signing failed", err))?;
    let signature = signed_request::sign(&params, &args.secret)
        .map_err(|err| signature_error("signing failed", err))?;
    print_fields(
        &[
            ("signedRequest", signed),
            (SIGNATURE_PARAM, signature),
        ],
        format,
    );
    Ok(SUCCESS)
}
