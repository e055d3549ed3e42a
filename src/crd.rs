//! Custom resource definitions consumed from the cluster (§6): two checksum
//! objects, `IngressCheckSum` and `SecretCheckSum`, each carrying
//! `spec: {timestamp, checksum (hex md5), ids[]}` (§3, §4.F). Both are
//! read-only to the core; a central controller is the sole writer.

use kube::{CustomResource, CustomResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::CheckSumSpec;

/// Fleet-wide fingerprint of the ingress set a central controller has
/// published, checked by the ingress admission gate (§4.F).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "tengine.taobao.org",
    version = "v1",
    kind = "IngressCheckSum",
    plural = "ingresschecksums",
    namespaced
)]
pub struct IngressCheckSumSpec {
    #[serde(flatten)]
    pub inner: CheckSumSpec,
}

/// Fleet-wide fingerprint of the secret set a central controller has
/// published, checked by the secret admission gate (§4.F).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "tengine.taobao.org",
    version = "v1",
    kind = "SecretCheckSum",
    plural = "secretchecksums",
    namespaced
)]
pub struct SecretCheckSumSpec {
    #[serde(flatten)]
    pub inner: CheckSumSpec,
}

/// Emit both CRD manifests without schemars `format` annotations that OLM
/// dislikes, matching the teacher's `print_crd_without_formats` helper.
pub fn print_crds_without_formats() -> anyhow::Result<()> {
    for crd in [
        serde_json::to_value(IngressCheckSum::crd())?,
        serde_json::to_value(SecretCheckSum::crd())?,
    ] {
        let mut v = crd;
        strip_format_keys(&mut v);
        println!("{}", serde_yaml::to_string(&v)?);
        println!("---");
    }
    Ok(())
}

fn strip_format_keys(v: &mut serde_json::Value) {
    use serde_json::Value::*;
    match v {
        Object(map) => {
            map.remove("format");
            for val in map.values_mut() {
                strip_format_keys(val);
            }
        }
        Array(arr) => {
            for val in arr {
                strip_format_keys(val);
            }
        }
        _ => {}
    }
}
