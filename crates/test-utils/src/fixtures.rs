//! Configuration document fixtures.
//!
//! All fixtures disable the inter-cell cooldown so sweeps run at full speed.

/// A single JSON service swept at `levels` with `requests_per_user`.
pub fn json_service_yaml(name: &str, url: &str, levels: &[u32], requests_per_user: u32) -> String {
    format!(
        r#"
services:
  - name: {name}
    url: {url}
    request_type: json
    request_body:
      user: alice
      amount: 42
concurrent_users: {levels:?}
requests_per_user: {requests_per_user}
cooldown_secs: 0
request_timeout_secs: 5
probe_timeout_secs: 2
"#
    )
}

/// Two JSON services sharing one sweep.
pub fn two_service_yaml(
    (first_name, first_url): (&str, &str),
    (second_name, second_url): (&str, &str),
    levels: &[u32],
    requests_per_user: u32,
) -> String {
    format!(
        r#"
services:
  - name: {first_name}
    url: {first_url}
    request_body:
      user: alice
  - name: {second_name}
    url: {second_url}
    request_body:
      user: bob
concurrent_users: {levels:?}
requests_per_user: {requests_per_user}
cooldown_secs: 0
request_timeout_secs: 5
probe_timeout_secs: 2
"#
    )
}
