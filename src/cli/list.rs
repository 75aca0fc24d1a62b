use modelpool::pool::{EntryInfo, EntryState};
use modelpool::providers::ProviderIdentifier;
use modelpool::{ClientKind, RateLimits};
use table::{IntoTable, Table};

pub(crate) mod table;

use super::interrupt_token;
use super::populate::{populated_registry, Populated};
use crate::config::Config;
use crate::{ListArgs, ListingFormat};

/// One row of `modelpool list`. Credentials are never part of a listing.
#[derive(serde::Serialize)]
struct Entry {
    pool: String,
    key: String,
    provider: Option<ProviderIdentifier>,
    kind: ClientKind,
    model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    limits: RateLimits,
    state: EntryState,
}

impl Entry {
    fn new(populated: &Populated, info: EntryInfo) -> Entry {
        Entry {
            provider: populated.provider(&info.key),
            pool: info.key.pool_id,
            key: info.key.key,
            kind: info.kind,
            model_id: info.model_id,
            endpoint: info.endpoint,
            limits: info.limits,
            state: info.state,
        }
    }
}

fn limit_cell<N: ToString>(limit: Option<N>) -> String {
    limit.map(|n| n.to_string()).unwrap_or_default()
}

impl From<Vec<Entry>> for Table {
    fn from(value: Vec<Entry>) -> Self {
        let mut tab = Table::new();

        tab.set_header(vec![
            "POOL", "KEY", "PROVIDER", "KIND", "MODEL", "RPS", "RPM", "RPD", "TPD", "STATE",
        ]);

        for column in 5..=8 {
            tab.align_right(column);
        }

        for entry in value {
            tab.add_row(vec![
                entry.pool,
                entry.key,
                entry
                    .provider
                    .map(|provider| provider.to_string())
                    .unwrap_or_default(),
                entry.kind.to_string(),
                entry.model_id,
                limit_cell(entry.limits.requests_per_second),
                limit_cell(entry.limits.requests_per_minute),
                limit_cell(entry.limits.requests_per_day),
                limit_cell(entry.limits.tokens_per_day),
                entry.state.to_string(),
            ]);
        }

        tab
    }
}

fn format_output<O: IntoTable + serde::Serialize>(object: O, format: ListingFormat) -> String {
    match format {
        ListingFormat::Json => match serde_json::to_string_pretty(&object) {
            Ok(output) => format!("{}\n", output),
            Err(err) => crate::die!("failed to serialize listing: {}", err),
        },
        ListingFormat::Table => object.into_table().to_string(),
        ListingFormat::HeaderlessTable => {
            let mut tab = object.into_table();

            tab.print_header(false);

            tab.to_string()
        }
    }
}

pub(crate) async fn list_cmd(config: &Config, args: &ListArgs) {
    let cancel = interrupt_token();

    let populated = populated_registry(config, &cancel).await;

    let entries: Vec<Entry> = populated
        .registry
        .list(args.pool.as_deref())
        .into_iter()
        .map(|info| Entry::new(&populated, info))
        .collect();

    print!("{}", format_output(entries, args.format));

    populated.shutdown().await;
}
