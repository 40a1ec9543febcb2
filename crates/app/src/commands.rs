//! Command router: the flat `call(path, args)` form used by request/response
//! topics.
//!
//! Commands live in a dispatch tree built once at construction. A path is
//! consumed segment by segment (`snake_case` segments are matched as
//! `camelCase`); resolution stops at the first segment without a match:
//!
//! - a [`Dispatch::Leaf`] reached exactly is invoked with the arguments;
//! - a [`Dispatch::Node`] reached exactly runs its index handler;
//! - a node where resolution stopped early runs its residual handler with
//!   the remaining segments.
//!
//! Anything else is `no such command: <path>`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use meshbridge_domain::device::RemoveMode;
use meshbridge_domain::envelope::{Command, Response};
use meshbridge_domain::error::{BridgeError, NotFoundError, ValidationError};
use meshbridge_domain::path::Path;
use meshbridge_domain::state::StateMap;

use crate::pipeline::ConverterPipeline;
use crate::ports::Operation;
use crate::resolver::{Resolved, Resolver};
use crate::services::{DevicesApi, GroupsApi};

type CommandResult = Result<Option<Value>, BridgeError>;

/// A command invoked with the full arguments.
type LeafFn = fn(Context, Value) -> BoxFuture<'static, CommandResult>;

/// A handler invoked with the unmatched path segments and the arguments.
type ResidualFn = fn(Context, Vec<String>, Value) -> BoxFuture<'static, CommandResult>;

/// What commands operate on.
#[derive(Clone)]
pub struct Context {
    pub resolver: Resolver,
    pub pipeline: ConverterPipeline,
    pub devices: Arc<DevicesApi>,
    pub groups: Arc<GroupsApi>,
}

/// One node of the dispatch tree.
pub enum Dispatch {
    Leaf(LeafFn),
    Node(CommandNode),
}

#[derive(Default)]
pub struct CommandNode {
    children: BTreeMap<&'static str, Dispatch>,
    index: Option<LeafFn>,
    residual: Option<ResidualFn>,
}

impl CommandNode {
    fn leaf(mut self, name: &'static str, handler: LeafFn) -> Self {
        self.children.insert(name, Dispatch::Leaf(handler));
        self
    }

    fn node(mut self, name: &'static str, node: CommandNode) -> Self {
        self.children.insert(name, Dispatch::Node(node));
        self
    }

    fn index(mut self, handler: LeafFn) -> Self {
        self.index = Some(handler);
        self
    }

    fn residual(mut self, handler: ResidualFn) -> Self {
        self.residual = Some(handler);
        self
    }
}

/// `set_state` → `setState`.
#[must_use]
pub fn normalize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper = false;
    for c in segment.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Where a path led.
enum Resolution<'a> {
    /// Every segment matched.
    Exact {
        target: &'a Dispatch,
        parent: &'a CommandNode,
    },
    /// Resolution stopped at `at` with `remaining` segments unmatched.
    Partial {
        at: &'a Dispatch,
        remaining: Vec<String>,
    },
}

pub struct CommandRouter {
    root: Dispatch,
    context: Context,
}

impl CommandRouter {
    pub fn new(context: Context) -> Self {
        let device = CommandNode::default()
            .leaf("remove", |ctx, args| Box::pin(remove_device(ctx, args)))
            .index(|ctx, _| Box::pin(async move { Ok(Some(ctx.devices.tree().to_value())) }))
            .residual(|ctx, remaining, _| {
                Box::pin(async move {
                    let path: Path = remaining.into_iter().collect();
                    ctx.devices.call(Command::Get, &path, Map::new()).await
                })
            });
        let group = CommandNode::default()
            .leaf("add", |ctx, args| Box::pin(add_group(ctx, args)))
            .leaf("remove", |ctx, args| Box::pin(remove_group(ctx, args)))
            .leaf("addDevice", |ctx, args| Box::pin(add_group_member(ctx, args)))
            .leaf("removeDevice", |ctx, args| Box::pin(remove_group_member(ctx, args)))
            .index(|ctx, _| Box::pin(async move { Ok(Some(ctx.groups.tree().to_value())) }))
            .residual(|ctx, remaining, _| {
                Box::pin(async move {
                    let path: Path = remaining.into_iter().collect();
                    ctx.groups.call(Command::Get, &path, Map::new()).await
                })
            });
        let root = CommandNode::default()
            .leaf("rename", |ctx, args| Box::pin(rename(ctx, args)))
            .leaf("setState", |ctx, args| Box::pin(set_state(ctx, args)))
            .leaf("requestState", |ctx, args| Box::pin(request_state(ctx, args)))
            .node("device", device)
            .node("group", group);
        Self {
            root: Dispatch::Node(root),
            context,
        }
    }

    fn resolve(&self, segments: &[&str]) -> Option<Resolution<'_>> {
        let Dispatch::Node(root) = &self.root else {
            return None;
        };
        let mut parent = root;
        let mut current = &self.root;
        for (consumed, segment) in segments.iter().enumerate() {
            let Dispatch::Node(node) = current else {
                // A leaf cannot take more segments.
                return Some(Resolution::Partial {
                    at: current,
                    remaining: segments[consumed..].iter().map(ToString::to_string).collect(),
                });
            };
            match node.children.get(normalize_segment(segment).as_str()) {
                Some(next) => {
                    parent = node;
                    current = next;
                }
                None => {
                    return Some(Resolution::Partial {
                        at: current,
                        remaining: segments[consumed..].iter().map(ToString::to_string).collect(),
                    });
                }
            }
        }
        Some(Resolution::Exact {
            target: current,
            parent,
        })
    }

    /// Invoke the command at `path` with `args`.
    ///
    /// Never fails: errors and unknown paths come back as failure responses.
    #[tracing::instrument(skip(self, args))]
    pub async fn call(&self, path: &str, args: Value) -> Response {
        let segments: Vec<&str> = path.split('/').collect();
        let ctx = self.context.clone();
        let future = match self.resolve(&segments) {
            Some(Resolution::Exact {
                target: Dispatch::Leaf(handler),
                ..
            }) => Some(handler(ctx, args)),
            Some(Resolution::Exact {
                target: Dispatch::Node(node),
                parent,
            }) => match (node.index, parent.residual) {
                (Some(index), _) => Some(index(ctx, args)),
                (None, Some(residual)) => Some(residual(ctx, Vec::new(), args)),
                (None, None) => None,
            },
            Some(Resolution::Partial {
                at: Dispatch::Node(node),
                remaining,
            }) => node.residual.map(|residual| residual(ctx, remaining, args)),
            _ => None,
        };
        let Some(future) = future else {
            return Response::failure(NotFoundError::Command(path.to_string()).to_string());
        };
        match future.await {
            Ok(data) => Response::success(data),
            Err(error) => {
                tracing::error!(%error, "command failed");
                Response::failure(error.to_string())
            }
        }
    }
}

/// An entity key: friendly name, device address or numeric group id.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EntityKey {
    Text(String),
    Number(u64),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s.trim()),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, BridgeError> {
    let args = match args {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(args).map_err(|err| {
        ValidationError::InvalidField {
            field: "arguments",
            reason: err.to_string(),
        }
        .into()
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameArgs {
    id: EntityKey,
    #[serde(alias = "new_name")]
    new_name: String,
}

async fn rename(ctx: Context, args: Value) -> CommandResult {
    let args: RenameArgs = parse_args(args)?;
    match ctx.resolver.entity(&args.id.to_string())? {
        Resolved::Device(device) => ctx.devices.rename(&device, &args.new_name)?,
        Resolved::Group(group) => ctx.groups.rename(group.id(), &args.new_name)?,
    }
    Ok(None)
}

#[derive(Deserialize)]
struct SetStateArgs {
    id: EntityKey,
    #[serde(default)]
    payload: StateMap,
}

async fn set_state(ctx: Context, args: Value) -> CommandResult {
    let args: SetStateArgs = parse_args(args)?;
    let entity = ctx.resolver.entity(&args.id.to_string())?;
    let applied = ctx
        .pipeline
        .apply(Operation::Set, &entity, &args.payload)
        .await;
    Ok(Some(Value::Bool(applied)))
}

#[derive(Deserialize)]
struct RequestStateArgs {
    id: EntityKey,
    #[serde(default)]
    payload: StateMap,
    #[serde(default)]
    attributes: Vec<String>,
}

async fn request_state(ctx: Context, args: Value) -> CommandResult {
    let RequestStateArgs {
        id,
        mut payload,
        attributes,
    } = parse_args(args)?;
    for attribute in attributes {
        payload.insert(attribute, Value::from(""));
    }
    let entity = ctx.resolver.entity(&id.to_string())?;
    let applied = ctx.pipeline.apply(Operation::Get, &entity, &payload).await;
    Ok(Some(Value::Bool(applied)))
}

#[derive(Deserialize)]
struct RemoveDeviceArgs {
    id: EntityKey,
    #[serde(default)]
    action: Option<String>,
}

async fn remove_device(ctx: Context, args: Value) -> CommandResult {
    let args: RemoveDeviceArgs = parse_args(args)?;
    let mode = match args.action.as_deref() {
        Some(action) => action.parse()?,
        None => RemoveMode::default(),
    };
    let device = ctx.resolver.device(&args.id.to_string())?;
    ctx.devices.remove(&device, mode).await?;
    Ok(None)
}

#[derive(Deserialize)]
struct AddGroupArgs {
    name: String,
    #[serde(default)]
    id: Option<EntityKey>,
}

async fn add_group(ctx: Context, args: Value) -> CommandResult {
    let args: AddGroupArgs = parse_args(args)?;
    let mut data = Map::new();
    data.insert("name".to_string(), Value::from(args.name));
    if let Some(id) = args.id {
        data.insert("id".to_string(), Value::from(id.to_string()));
    }
    ctx.groups.create(data).await.map(Some)
}

#[derive(Deserialize)]
struct RemoveGroupArgs {
    id: EntityKey,
}

async fn remove_group(ctx: Context, args: Value) -> CommandResult {
    let args: RemoveGroupArgs = parse_args(args)?;
    let group = ctx.resolver.group(&args.id.to_string())?;
    ctx.groups.remove(&group).await?;
    Ok(None)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberArgs {
    #[serde(alias = "group_id")]
    group_id: EntityKey,
    #[serde(alias = "device_id")]
    device_id: EntityKey,
}

async fn add_group_member(ctx: Context, args: Value) -> CommandResult {
    let args: MemberArgs = parse_args(args)?;
    ctx.groups
        .add_device(&args.group_id.to_string(), &args.device_id.to_string())
        .await?;
    Ok(None)
}

async fn remove_group_member(ctx: Context, args: Value) -> CommandResult {
    let args: MemberArgs = parse_args(args)?;
    ctx.groups
        .remove_device(&args.group_id.to_string(), &args.device_id.to_string())
        .await?;
    Ok(None)
}
