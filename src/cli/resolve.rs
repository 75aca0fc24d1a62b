use futures_util::future::join_all;
use modelpool::RegistrationKey;

use super::interrupt_token;
use super::populate::populated_registry;
use crate::config::Config;
use crate::{die, error, ResolveArgs};

/// Splits `pool/key`. The key may itself contain slashes.
fn parse_target(target: &str) -> Option<(&str, &str)> {
    match target.split_once('/') {
        Some((pool, key)) if !pool.is_empty() && !key.is_empty() => Some((pool, key)),
        _ => None,
    }
}

pub(crate) async fn resolve_cmd(config: &Config, args: &ResolveArgs) {
    let (pool, key) = match parse_target(&args.target) {
        Some(target) => target,
        None => die!(
            "failed to parse \"{}\", expected <pool>/<key>",
            args.target
        ),
    };

    let cancel = interrupt_token();
    let populated = populated_registry(config, &cancel).await;

    let client = match populated.registry.resolve(pool, key, &cancel).await {
        Ok(client) => client,
        Err(err) => die!("failed to resolve \"{}/{}\": {}", pool, key, err),
    };

    println!("provider: {}", client.provider());
    println!("kind: {}", client.kind());
    println!("model: {}", client.model_id());
    println!("url: {}", client.url());

    populated.shutdown().await;
}

/// Builds every registered client at once and reports which failed
pub(crate) async fn check_cmd(config: &Config) {
    let cancel = interrupt_token();
    let populated = populated_registry(config, &cancel).await;

    let keys: Vec<RegistrationKey> = populated
        .registry
        .list(None)
        .into_iter()
        .map(|info| info.key)
        .collect();

    let results = join_all(keys.iter().map(|key| {
        populated
            .registry
            .resolve(key.pool_id(), key.key(), &cancel)
    }))
    .await;

    let mut failures = 0usize;

    for (key, result) in keys.iter().zip(results) {
        match result {
            Ok(client) => println!("{}: ok ({})", key, client.url()),
            Err(err) => {
                failures += 1;
                error!("{}: {}", key, err);
            }
        }
    }

    populated.shutdown().await;

    if failures > 0 {
        die!("{} of {} models failed to build", failures, keys.len());
    }
}
