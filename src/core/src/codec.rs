//! Line-oriented wire codec for requests and outcomes.
//!
//! A record is one text line of comma-separated fields; every field is the
//! base64 encoding of the raw value bytes, or empty for an empty value. The
//! standard base64 alphabet contains no comma, quote or newline, so encoded
//! records never need quoting and stay decodable from a shell script.
//!
//! An outcome record has exactly five fields, in order: exit code (base64 of
//! its decimal text), internal-error text, stub key, stderr, stdout. A
//! request record has at least two fields: stub key, command name; any
//! further fields are arguments in order.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Result, StubError};
use crate::protocol::{ExecOutcome, StubRequest};

/// Number of fields in an outcome record.
const OUTCOME_FIELD_COUNT: usize = 5;

/// Encode a request as a single line (no trailing newline).
pub fn encode_request(req: &StubRequest) -> String {
    let mut fields = Vec::with_capacity(2 + req.args.len());
    fields.push(to_b64(req.key.as_bytes()));
    fields.push(to_b64(req.cmd_name.as_bytes()));
    for arg in &req.args {
        fields.push(to_b64(arg.as_bytes()));
    }
    fields.join(",")
}

/// Decode a request from a single record line.
pub fn decode_request(line: &str) -> Result<StubRequest> {
    let fields = split_record(line)?;
    if fields.len() < 2 {
        return Err(StubError::Codec(format!(
            "invalid record: expected at least 2 request fields but got {}, rec={:?}",
            fields.len(),
            fields
        )));
    }
    let key = from_b64_string(fields[0], "key")?;
    let cmd_name = from_b64_string(fields[1], "cmd_name")?;
    let mut args = Vec::with_capacity(fields.len() - 2);
    for (i, field) in fields[2..].iter().enumerate() {
        args.push(from_b64_string(field, &format!("args[{i}]"))?);
    }
    Ok(StubRequest {
        key,
        cmd_name,
        args,
    })
}

/// Encode an outcome as a single line (no trailing newline).
pub fn encode_outcome(outcome: &ExecOutcome) -> String {
    [
        to_b64(outcome.exit_code.to_string().as_bytes()),
        to_b64(outcome.internal_err_txt.as_bytes()),
        to_b64(outcome.key.as_bytes()),
        to_b64(&outcome.stderr),
        to_b64(&outcome.stdout),
    ]
    .join(",")
}

/// Decode an outcome from a single record line.
pub fn decode_outcome(line: &str) -> Result<ExecOutcome> {
    let fields = split_record(line)?;
    if fields.len() != OUTCOME_FIELD_COUNT {
        return Err(StubError::Codec(format!(
            "invalid record: expected {} outcome fields but got {}, rec={:?}",
            OUTCOME_FIELD_COUNT,
            fields.len(),
            fields
        )));
    }
    let exit_code = decode_exit_code(fields[0])?;
    Ok(ExecOutcome {
        exit_code,
        internal_err_txt: from_b64_string(fields[1], "internal_err_txt")?,
        key: from_b64_string(fields[2], "key")?,
        stderr: from_b64(fields[3], "stderr")?,
        stdout: from_b64(fields[4], "stdout")?,
    })
}

fn decode_exit_code(field: &str) -> Result<u8> {
    let txt = from_b64_string(field, "exit_code")?;
    let code: u32 = txt.parse().map_err(|e| {
        StubError::Codec(format!("malformed exit code '{txt}': {e}"))
    })?;
    if code > u8::MAX as u32 {
        return Err(StubError::Codec(format!(
            "exit code out of range: {code} > {}",
            u8::MAX
        )));
    }
    Ok(code as u8)
}

fn split_record(line: &str) -> Result<Vec<&str>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.contains('"') {
        return Err(StubError::Codec(format!(
            "invalid record: unexpected quote in base64 fields, rec={line:?}"
        )));
    }
    Ok(line.split(',').collect())
}

fn to_b64(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    BASE64.encode(bytes)
}

fn from_b64(field: &str, field_name: &str) -> Result<Vec<u8>> {
    if field.is_empty() {
        return Ok(Vec::new());
    }
    BASE64.decode(field).map_err(|e| {
        StubError::Codec(format!(
            "fail to base64 decode field {field_name}='{field}': {e}"
        ))
    })
}

fn from_b64_string(field: &str, field_name: &str) -> Result<String> {
    let bytes = from_b64(field, field_name)?;
    String::from_utf8(bytes).map_err(|e| {
        StubError::Codec(format!(
            "field {field_name} is not valid UTF-8: {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let req = StubRequest::new(
            "SuperExe_42",
            "SuperExe",
            vec!["arg1".to_string(), "--argsb".to_string()],
        );
        let decoded = decode_request(&encode_request(&req)).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_request_roundtrip_no_args() {
        let req = StubRequest::new("k", "cmd", vec![]);
        let decoded = decode_request(&encode_request(&req)).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_request_roundtrip_delimiter_bearing_args() {
        let req = StubRequest::new(
            "docker_7",
            "docker",
            vec![
                "table '{{.Repository}}:{{.Tag}}'".to_string(),
                "multi\nline,with\"quotes\"".to_string(),
                String::new(),
            ],
        );
        let line = encode_request(&req);
        assert!(!line.contains('\n'));
        assert_eq!(decode_request(&line).unwrap(), req);
    }

    #[test]
    fn test_request_too_few_fields() {
        let err = decode_request("YWJj").unwrap_err();
        assert!(matches!(err, StubError::Codec(_)));
        assert!(err.to_string().contains("at least 2"));
    }

    #[test]
    fn test_request_bad_base64_names_field() {
        let err = decode_request("YWJj,%%%").unwrap_err();
        assert!(err.to_string().contains("cmd_name"));
    }

    #[test]
    fn test_outcome_roundtrip() {
        let outcome = ExecOutcome {
            key: "k1".to_string(),
            stdout: b"out\nwith,delims".to_vec(),
            stderr: b"err1".to_vec(),
            exit_code: 3,
            internal_err_txt: String::new(),
        };
        let decoded = decode_outcome(&encode_outcome(&outcome)).unwrap();
        assert_eq!(decoded, outcome);
    }

    #[test]
    fn test_outcome_roundtrip_all_empty() {
        let outcome = ExecOutcome::default();
        let line = encode_outcome(&outcome);
        // exit code 0 still encodes, everything else stays empty
        assert_eq!(line.matches(',').count(), 4);
        assert_eq!(decode_outcome(&line).unwrap(), outcome);
    }

    #[test]
    fn test_outcome_roundtrip_max_exit_code() {
        let outcome = ExecOutcome::internal_failure("k", "it broke");
        assert_eq!(decode_outcome(&encode_outcome(&outcome)).unwrap(), outcome);
    }

    #[test]
    fn test_outcome_wrong_arity() {
        let err = decode_outcome("MA==,,,").unwrap_err();
        assert!(err.to_string().contains("5 outcome fields"));
    }

    #[test]
    fn test_outcome_exit_code_out_of_range() {
        // base64("300") followed by four empty fields
        let line = format!("{},,,,", BASE64.encode("300"));
        let err = decode_outcome(&line).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_outcome_exit_code_not_decimal() {
        let line = format!("{},,,,", BASE64.encode("abc"));
        let err = decode_outcome(&line).unwrap_err();
        assert!(err.to_string().contains("malformed exit code"));
    }

    #[test]
    fn test_trailing_newline_tolerated() {
        let req = StubRequest::new("k", "cmd", vec!["a".to_string()]);
        let line = format!("{}\n", encode_request(&req));
        assert_eq!(decode_request(&line).unwrap(), req);
    }
}
