//! Cloud ID decoding.
//!
//! A cloud ID is `<label>:<base64("host[:port]$es_uuid$kibana_uuid")>`; the
//! search endpoint is `https://<es_uuid>.<host>[:port]`.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

use crate::config::ConfigError;

const DEFAULT_PORT: &str = "443";

pub fn endpoint_from_cloud_id(cloud_id: &str) -> Result<String, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        key: "output.cloud_id".into(),
        message: message.into(),
    };

    let encoded = match cloud_id.split_once(':') {
        Some((_label, encoded)) => encoded,
        None => cloud_id,
    };
    let decoded = STANDARD
        .decode(encoded)
        .or_else(|_| STANDARD_NO_PAD.decode(encoded.trim_end_matches('=')))
        .map_err(|_| invalid("not valid base64"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid("not valid UTF-8"))?;

    let mut parts = decoded.trim_end_matches('$').split('$');
    let host = parts.next().filter(|h| !h.is_empty());
    let es_uuid = parts.next().filter(|u| !u.is_empty());
    let (Some(host), Some(es_uuid)) = (host, es_uuid) else {
        return Err(invalid("missing host or cluster id"));
    };

    let (host, port) = match host.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => (host, DEFAULT_PORT),
    };

    if port == DEFAULT_PORT {
        Ok(format!("https://{es_uuid}.{host}"))
    } else {
        Ok(format!("https://{es_uuid}.{host}:{port}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud_id(label: &str, payload: &str) -> String {
        format!("{label}:{}", STANDARD.encode(payload))
    }

    #[test]
    fn test_decodes_default_port() {
        let id = cloud_id("prod", "us-east-1.aws.found.io$abc123$kib456");
        assert_eq!(
            endpoint_from_cloud_id(&id).unwrap(),
            "https://abc123.us-east-1.aws.found.io"
        );
    }

    #[test]
    fn test_keeps_explicit_port() {
        let id = cloud_id("prod", "eastus2.azure.elastic-cloud.com:9243$abc$def");
        assert_eq!(
            endpoint_from_cloud_id(&id).unwrap(),
            "https://abc.eastus2.azure.elastic-cloud.com:9243"
        );
    }

    #[test]
    fn test_accepts_unpadded_payload() {
        let encoded = STANDARD_NO_PAD.encode("host.example$es1");
        let id = format!("x:{encoded}");
        assert_eq!(endpoint_from_cloud_id(&id).unwrap(), "https://es1.host.example");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(endpoint_from_cloud_id("label:!!!").is_err());
        let id = cloud_id("x", "only-host");
        assert!(endpoint_from_cloud_id(&id).is_err());
    }
}
