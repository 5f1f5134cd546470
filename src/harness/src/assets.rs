//! Embedded assets: the shell-script packaging of the stand-in.
//!
//! The script implements the same state machine as the native stand-in
//! (sidecar load, helper-process delegation, static outcome, dynamic
//! outcome over the FIFO pair) using nothing but POSIX userland plus bash,
//! so a stub can run where shipping a second binary is inconvenient.

/// The shell stand-in. Written verbatim into the per-stub directory with
/// execute permission.
pub const SHELL_STANDIN_SCRIPT: &str = r##"#!/usr/bin/env bash
# cmdstub shell stand-in. Reads the sidecar next to this script and
# effectuates the configured outcome: helper-process delegation, static
# replay, or a dynamic request over the fifo pair.
set -u

self="$0"
cfg="${self}.config"

fatal() {
  printf '%s\n' "$1" >&2
  exit 255
}

[ -f "$cfg" ] || fatal "config file not found at: $cfg"

cfg_val() {
  sed -n "s/^$1=//p" "$cfg" | head -n 1
}

b64enc() {
  if [ -z "$1" ]; then
    printf ''
  else
    printf '%s' "$1" | base64 | tr -d '\n'
  fi
}

b64dec() {
  if [ -z "$1" ]; then
    printf ''
  else
    printf '%s' "$1" | base64 -d
  fi
}

stub_key="$(cfg_val __CMDSTUB_STUB_KEY)"
cmd_name="$(cfg_val __CMDSTUB_CMD_TO_STUB)"
unit_test_exec="$(cfg_val __CMDSTUB_UNIT_TEST_EXEC)"
helper_method="$(cfg_val __CMDSTUB_HELPER_METHOD)"
data_dir="$(cfg_val __CMDSTUB_DATA_DIR)"
timeout_nanos="$(cfg_val __CMDSTUB_TIMEOUT_NANOS)"
stubber_pipe="$(cfg_val __CMDSTUB_STUBBER_PIPE)"
helper_pipe="$(cfg_val __CMDSTUB_HELPER_PIPE)"
std_err_b64="$(cfg_val __CMDSTUB_STD_ERR)"
std_out_b64="$(cfg_val __CMDSTUB_STD_OUT)"
exit_code="$(cfg_val __CMDSTUB_EXIT_CODE)"

timeout_secs=10
if [ -n "$timeout_nanos" ]; then
  timeout_secs=$(( (timeout_nanos + 999999999) / 1000000000 ))
fi

# one codec line: base64 fields, comma separated: key, command, args...
encode_request() {
  line="$(b64enc "$stub_key"),$(b64enc "$cmd_name")"
  for arg in "$@"; do
    line="${line},$(b64enc "$arg")"
  done
  printf '%s' "$line"
}

if [ -n "$helper_method" ]; then
  out_dir="${self}_helper_out_$$"
  mkdir -p "$out_dir" || fatal "fail to create helper out dir: $out_dir"
  __CMDSTUB_HELPER_ACTIVE=1 \
  __CMDSTUB_SIDECAR_PATH="$cfg" \
  __CMDSTUB_HELPER_ARGS="$(encode_request "$@")" \
  __CMDSTUB_HELPER_OUT_DIR="$out_dir" \
    "$unit_test_exec" "$helper_method" --exact --nocapture \
    > "$out_dir/raw_stdout" 2> "$out_dir/raw_stderr"
  code=$?
  if [ -f "$out_dir/helper_stdout" ] || [ -f "$out_dir/helper_stderr" ]; then
    [ -f "$out_dir/helper_stderr" ] && cat "$out_dir/helper_stderr" >&2
    [ -f "$out_dir/helper_stdout" ] && cat "$out_dir/helper_stdout"
  else
    cat "$out_dir/raw_stdout" "$out_dir/raw_stderr" >&2
  fi
  rm -rf "$out_dir"
  exit "$code"
fi

if [ -n "$std_out_b64" ] || [ -n "$std_err_b64" ] || [ -n "$exit_code" ]; then
  # static outcome: persist the request, replay the recorded streams
  [ -n "$data_dir" ] || fatal "data directory not configured"
  sleep 0.002
  req_file="${data_dir}/ser_stubrequest_$(date +%Y-%m-%d-%H-%M-%S-%N)_$(printf '%06d' "$RANDOM")"
  encode_request "$@" > "$req_file" || fatal "fail to save request to: $req_file"
  printf '\n' >> "$req_file"
  b64dec "$std_err_b64" >&2
  b64dec "$std_out_b64"
  [ -n "$exit_code" ] || fatal "exit code not configured"
  exit "$exit_code"
fi

# dynamic outcome: the pipe entries may be empty, the harness writes the
# fifos after the sidecar; fall back to the newest matching neighbour file
pipe_dir="$(dirname "$self")"
if [ -z "$stubber_pipe" ]; then
  stubber_pipe="$(ls -1t "${pipe_dir}/${cmd_name}"_stubber_pipe_* 2>/dev/null | head -n 1)"
fi
if [ -z "$helper_pipe" ]; then
  helper_pipe="$(ls -1t "${pipe_dir}/${cmd_name}"_testprocesshelper_pipe_* 2>/dev/null | head -n 1)"
fi
[ -p "$stubber_pipe" ] || fatal "stubber pipe not found at: $stubber_pipe"
[ -p "$helper_pipe" ] || fatal "helper pipe not found at: $helper_pipe"

req_line="$(encode_request "$@")"
printf '%s\n' "$req_line" \
  | CMDSTUB_PIPE="$stubber_pipe" timeout "$timeout_secs" sh -c 'cat > "$CMDSTUB_PIPE"' \
  || fatal "timeout writing stub request to: $stubber_pipe"

resp="$(timeout "$timeout_secs" head -n 1 "$helper_pipe")" \
  || fatal "timeout reading stub outcome from: $helper_pipe"
[ -n "$resp" ] || fatal "empty stub outcome from: $helper_pipe"

IFS=, read -r f_exit f_interr f_key f_stderr f_stdout <<< "$resp"

out_exit="$(b64dec "$f_exit")"
internal_err="$(b64dec "$f_interr")"
b64dec "$f_stdout"
b64dec "$f_stderr" >&2
if [ -n "$internal_err" ]; then
  printf '%s' "$internal_err" >&2
  exit 255
fi
exit "$out_exit"
"##;
