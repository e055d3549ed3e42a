//! Hot-reload protobuf wire contract (§4.G, §9).
//!
//! Field numbers are pinned once assigned: evolving a field means adding a
//! new one, never renumbering, and setting both old and new in the
//! controller until the data plane is upgraded. The original `.proto` this
//! contract was distilled from was not available to ground these exact
//! numbers (see DESIGN.md); the assignment below starts at 1 per message
//! and is treated as authoritative from here on.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct Config {
    #[prost(message, repeated, tag = "1")]
    pub routers: Vec<Router>,
    #[prost(message, repeated, tag = "2")]
    pub services: Vec<VirtualService>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Router {
    #[prost(oneof = "router::Kind", tags = "1, 2, 3")]
    pub kind: Option<router::Kind>,
}

pub mod router {
    use super::{ApiRouter, AppnameRouter, HostRouter};

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Host(HostRouter),
        #[prost(message, tag = "2")]
        Appname(AppnameRouter),
        #[prost(message, tag = "3")]
        Api(ApiRouter),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct HostRouter {
    #[prost(string, tag = "1")]
    pub host: String,
    #[prost(string, tag = "2")]
    pub service_name: String,
    #[prost(message, repeated, tag = "3")]
    pub paths: Vec<PathRouter>,
    #[prost(message, repeated, tag = "4")]
    pub tags: Vec<TagRouter>,
    #[prost(string, tag = "5")]
    pub r#type: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct AppnameRouter {
    #[prost(string, tag = "1")]
    pub app_name: String,
    #[prost(string, tag = "2")]
    pub service_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ApiRouter {
    #[prost(string, tag = "1")]
    pub api_path: String,
    #[prost(string, tag = "2")]
    pub service_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PathRouter {
    #[prost(string, tag = "1")]
    pub prefix: String,
    #[prost(string, tag = "2")]
    pub service_name: String,
    #[prost(message, repeated, tag = "3")]
    pub tags: Vec<TagRouter>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TagRouter {
    #[prost(string, tag = "1")]
    pub service_name: String,
    #[prost(message, repeated, tag = "2")]
    pub rules: Vec<TagRule>,
}

/// A conjunction of `TagItem`s (§4.G).
#[derive(Clone, PartialEq, Message)]
pub struct TagRule {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<TagItem>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TagItem {
    #[prost(enumeration = "TagLocation", tag = "1")]
    pub location: i32,
    #[prost(string, tag = "2")]
    pub key: String,
    #[prost(enumeration = "MatchType", tag = "3")]
    pub match_type: i32,
    #[prost(oneof = "tag_item::Condition", tags = "4, 5, 6")]
    pub condition: Option<tag_item::Condition>,
}

pub mod tag_item {
    use super::ModCompare;

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Condition {
        #[prost(string, tag = "4")]
        ExactString(String),
        #[prost(string, repeated, tag = "5")]
        StringList(Vec<String>),
        #[prost(message, tag = "6")]
        ModCompare(ModCompare),
    }
}

#[derive(Clone, PartialEq, ::prost::Enumeration)]
#[repr(i32)]
pub enum TagLocation {
    Header = 0,
    Query = 1,
    NgxVar = 2,
    XBizInfo = 3,
    Cookie = 4,
}

#[derive(Clone, PartialEq, ::prost::Enumeration)]
#[repr(i32)]
pub enum MatchType {
    Whole = 0,
    StrListIn = 1,
    ModCompare = 2,
}

#[derive(Clone, PartialEq, ::prost::Enumeration)]
#[repr(i32)]
pub enum CompareOperator {
    Eq = 0,
    Lt = 1,
    Le = 2,
    Gt = 3,
    Ge = 4,
}

#[derive(Clone, PartialEq, Message)]
pub struct ModCompare {
    #[prost(uint32, tag = "1")]
    pub divisor: u32,
    #[prost(uint32, tag = "2")]
    pub remainder: u32,
    #[prost(enumeration = "CompareOperator", tag = "3")]
    pub operator: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct VirtualService {
    #[prost(string, tag = "1")]
    pub service_name: String,
    #[prost(message, repeated, tag = "2")]
    pub upstreams: Vec<WeightedUpstream>,
    #[prost(uint32, tag = "3")]
    pub connect_timeout_ms: u32,
    #[prost(uint32, tag = "4")]
    pub read_timeout_ms: u32,
    #[prost(uint32, tag = "5")]
    pub write_timeout_ms: u32,
    #[prost(bool, tag = "6")]
    pub force_https: bool,
    #[prost(map = "string, string", tag = "7")]
    pub metadata: std::collections::HashMap<String, String>,
    #[prost(message, repeated, tag = "8")]
    pub actions: Vec<Action>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WeightedUpstream {
    #[prost(string, tag = "1")]
    pub target: String,
    #[prost(uint32, tag = "2")]
    pub weight: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Action {
    #[prost(enumeration = "ActionKind", tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(oneof = "action::Value", tags = "3, 4")]
    pub value: Option<action::Value>,
}

pub mod action {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(string, tag = "3")]
        Static(String),
        /// Dynamic lookup by variable name, with the leading `$` stripped (§4.G).
        #[prost(string, tag = "4")]
        Dynamic(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Enumeration)]
#[repr(i32)]
pub enum ActionKind {
    RequestHeaderAdd = 0,
    RequestHeaderAppend = 1,
    ResponseHeaderAdd = 2,
    ResponseHeaderAppend = 3,
    QueryAdd = 4,
}

/// Strip the leading `$` from a dynamic-value variable reference (§4.G).
pub fn dynamic_variable_name(raw: &str) -> &str {
    raw.strip_prefix('$').unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_value_strips_leading_dollar() {
        assert_eq!(dynamic_variable_name("$remote_addr"), "remote_addr");
        assert_eq!(dynamic_variable_name("remote_addr"), "remote_addr");
    }

    #[test]
    fn config_round_trips_through_prost_bytes() {
        let cfg = Config {
            routers: vec![Router {
                kind: Some(router::Kind::Host(HostRouter {
                    host: "foo.bar".into(),
                    service_name: "default-s-80".into(),
                    paths: vec![],
                    tags: vec![],
                    r#type: "http".into(),
                })),
            }],
            services: vec![VirtualService {
                service_name: "default-s-80".into(),
                upstreams: vec![WeightedUpstream {
                    target: "10.0.0.1:80".into(),
                    weight: 100,
                }],
                connect_timeout_ms: 1000,
                read_timeout_ms: 5000,
                write_timeout_ms: 5000,
                force_https: false,
                metadata: Default::default(),
                actions: vec![],
            }],
        };
        let bytes = cfg.encode_to_vec();
        let decoded = Config::decode(bytes.as_slice()).unwrap();
        assert_eq!(cfg, decoded);
    }
}
