//! Built-in item catalogs for deploy configs and host inventory entries.

use once_cell::sync::Lazy;

use super::{DefaultContext, DefaultValue, ItemSet, RequiredType};
use crate::value::Value;

pub const KEY_USER: &str = "user";
pub const KEY_CONTAINER_IMAGE: &str = "container_image";
pub const KEY_LOG_DIR: &str = "log_dir";
pub const KEY_DATA_DIR: &str = "data_dir";
pub const KEY_CORE_DIR: &str = "core_dir";
pub const KEY_REPORT_USAGE: &str = "report_usage";
pub const KEY_LISTEN_IP: &str = "listen.ip";
pub const KEY_LISTEN_PORT: &str = "listen.port";
pub const KEY_LISTEN_CLIENT_PORT: &str = "listen.client_port";
pub const KEY_LISTEN_DUMMY_PORT: &str = "listen.dummy_port";
pub const KEY_LISTEN_PROXY_PORT: &str = "listen.proxy_port";
pub const KEY_LISTEN_EXTERNAL_IP: &str = "listen.external_ip";
pub const KEY_LISTEN_EXTERNAL_PORT: &str = "listen.external_port";
pub const KEY_COPYSETS: &str = "copysets";
pub const KEY_VARIABLE: &str = "variable";

pub const KEY_HOST: &str = "host";
pub const KEY_HOSTNAME: &str = "hostname";
pub const KEY_SSH_PORT: &str = "ssh_port";
pub const KEY_PRIVATE_KEY_FILE: &str = "private_key_file";
pub const KEY_FORWARD_AGENT: &str = "forward_agent";
pub const KEY_BECOME_USER: &str = "become_user";
pub const KEY_LABELS: &str = "labels";
pub const KEY_ENVS: &str = "envs";

fn role_port(role: &str) -> Option<i64> {
    match role {
        "etcd" => Some(2380),
        "mds" => Some(6700),
        "chunkserver" => Some(8200),
        "snapshotclone" => Some(5555),
        "metaserver" => Some(6800),
        _ => None,
    }
}

fn role_dummy_port(role: &str) -> Option<i64> {
    match role {
        "mds" => Some(7700),
        "snapshotclone" => Some(8081),
        _ => None,
    }
}

/// Items understood by every deploy config.
pub static DEPLOY_ITEMS: Lazy<ItemSet> = Lazy::new(|| {
    let mut set = ItemSet::new();
    let none = || DefaultValue::None;

    set.insert(KEY_USER, RequiredType::String, true, none());
    set.insert(
        KEY_CONTAINER_IMAGE,
        RequiredType::String,
        true,
        DefaultValue::computed(|ctx: &DefaultContext<'_>| {
            Some(Value::String(format!("opencurvedocker/{}:latest", ctx.kind)))
        }),
    );
    set.insert(KEY_LOG_DIR, RequiredType::String, true, none());
    set.insert(KEY_DATA_DIR, RequiredType::String, true, none());
    set.insert(KEY_CORE_DIR, RequiredType::String, true, none());
    set.insert(
        KEY_REPORT_USAGE,
        RequiredType::Bool,
        true,
        DefaultValue::Static(Value::Bool(true)),
    );
    set.insert(
        KEY_LISTEN_IP,
        RequiredType::String,
        false,
        DefaultValue::Static(Value::String("${service_host}".into())),
    );
    set.insert(
        KEY_LISTEN_PORT,
        RequiredType::PositiveInt,
        false,
        DefaultValue::computed(|ctx| role_port(ctx.role).map(Value::Int)),
    );
    set.insert(
        KEY_LISTEN_CLIENT_PORT,
        RequiredType::PositiveInt,
        false,
        DefaultValue::computed(|ctx| (ctx.role == "etcd").then_some(Value::Int(2379))),
    );
    set.insert(
        KEY_LISTEN_DUMMY_PORT,
        RequiredType::PositiveInt,
        false,
        DefaultValue::computed(|ctx| role_dummy_port(ctx.role).map(Value::Int)),
    );
    set.insert(
        KEY_LISTEN_PROXY_PORT,
        RequiredType::PositiveInt,
        false,
        DefaultValue::computed(|ctx| (ctx.role == "snapshotclone").then_some(Value::Int(8080))),
    );
    set.insert(KEY_LISTEN_EXTERNAL_IP, RequiredType::String, false, none());
    set.insert(KEY_LISTEN_EXTERNAL_PORT, RequiredType::PositiveInt, false, none());
    set.insert(
        KEY_COPYSETS,
        RequiredType::PositiveInt,
        false,
        DefaultValue::computed(|ctx| (ctx.role == "chunkserver").then_some(Value::Int(100))),
    );
    set.insert(KEY_VARIABLE, RequiredType::Any, true, none());
    set
});

/// Items understood by host inventory entries.
pub static HOST_ITEMS: Lazy<ItemSet> = Lazy::new(|| {
    let mut set = ItemSet::new();
    set.insert(KEY_HOST, RequiredType::String, false, DefaultValue::None);
    set.insert(KEY_HOSTNAME, RequiredType::String, false, DefaultValue::None);
    set.insert(
        KEY_SSH_PORT,
        RequiredType::PositiveInt,
        false,
        DefaultValue::Static(Value::Int(22)),
    );
    set.insert(
        KEY_USER,
        RequiredType::String,
        false,
        DefaultValue::computed(|_| {
            let user = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
            Some(Value::String(user))
        }),
    );
    set.insert(
        KEY_PRIVATE_KEY_FILE,
        RequiredType::String,
        false,
        DefaultValue::Static(Value::String("~/.ssh/id_rsa".into())),
    );
    set.insert(
        KEY_FORWARD_AGENT,
        RequiredType::Bool,
        false,
        DefaultValue::Static(Value::Bool(false)),
    );
    set.insert(KEY_BECOME_USER, RequiredType::String, false, DefaultValue::None);
    set.insert(KEY_LABELS, RequiredType::Any, false, DefaultValue::None);
    set.insert(KEY_ENVS, RequiredType::Any, false, DefaultValue::None);
    set
});
