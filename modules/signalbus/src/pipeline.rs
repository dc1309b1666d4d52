//! The stages one inbound message passes through.
//!
//! serve → request → finding → authorizing → arguing → execute, then
//! response once the whole request chain has settled. Every stage that owns
//! a step list clears the previous one first, so hooks never leak across a
//! stage boundary.

use std::sync::Arc;

use crate::context::{Context, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Request,
    Finding,
    Authorizing,
    Arguing,
    Execute,
}

pub(crate) fn stage(ctx: &mut Context, stage: Stage) {
    match stage {
        Stage::Request => request(ctx),
        Stage::Finding => finding(ctx),
        Stage::Authorizing => authorizing(ctx),
        Stage::Arguing => arguing(ctx),
        Stage::Execute => execute(ctx),
    }
}

/// Entry point: request filters, then the request stage.
pub(crate) fn serve(ctx: &mut Context) {
    ctx.clear();
    let registry = Arc::clone(&ctx.registry);
    ctx.push_hooks(registry.request_filters());
    ctx.push(Step::Stage(Stage::Request));
    ctx.run();
}

/// The message could not be decoded: straight to the error chain.
pub(crate) fn reject(ctx: &mut Context, err: impl Into<anyhow::Error>) {
    ctx.clear();
    ctx.error(err);
    ctx.run();
}

/// Response filters. Called by the instance after `serve` returns, whatever
/// branch the request ended in.
pub(crate) fn respond(ctx: &mut Context) {
    ctx.clear();
    let registry = Arc::clone(&ctx.registry);
    ctx.push_hooks(registry.response_filters());
    ctx.run();
}

fn request(ctx: &mut Context) {
    ctx.clear();
    ctx.push(Step::Stage(Stage::Finding));
    ctx.push(Step::Stage(Stage::Authorizing));
    ctx.push(Step::Stage(Stage::Arguing));
    ctx.push(Step::Stage(Stage::Execute));
    ctx.next();
}

fn finding(ctx: &mut Context) {
    if ctx.event.is_none() {
        ctx.found();
    } else {
        ctx.next();
    }
}

/// Pass-through unless an authorizer was registered.
fn authorizing(ctx: &mut Context) {
    match ctx.registry.authorizer().cloned() {
        Some(authorizer) => authorizer(ctx),
        None => ctx.next(),
    }
}

fn arguing(ctx: &mut Context) {
    let Some(event) = ctx.event.clone() else {
        ctx.found();
        return;
    };

    if let Some(args) = &event.args {
        let mut values = crate::Map::new();
        let mapping = signalbus_mapping::map(
            args,
            &ctx.value,
            &mut values,
            event.nullable,
            false,
            ctx.timezone(),
        );
        if mapping.fail() {
            ctx.failed(mapping);
            return;
        }
        ctx.args.extend(values);
    }
    ctx.next();
}

fn execute(ctx: &mut Context) {
    let Some(event) = ctx.event.clone() else {
        ctx.found();
        return;
    };

    ctx.clear();
    let registry = Arc::clone(&ctx.registry);
    ctx.push_hooks(registry.execute_filters());
    ctx.push_hooks(&event.actions);
    ctx.push_hooks(&event.action);
    ctx.next();
}
