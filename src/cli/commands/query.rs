//! The `query` subcommand: build the search, dispatch, print.

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::backend::aggregator::MultiSearchResult;
use crate::backend::SearchResult;
use crate::cli::{split_pair, QueryArgs};
use crate::config::Config;
use crate::error::{FuseError, Result};
use crate::opt::Opt;
use crate::search::LogSearch;

use super::{format_entry, parse_vars};

/// Run a query against one or more contexts.
pub async fn run(config: Config, args: QueryArgs) -> Result<()> {
    let base = build_search(&config, &args)?;
    let runtime_vars = parse_vars(&args.vars)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    if let [context] = args.contexts.as_slice() {
        let source = config.source(context)?;
        let backend = source.build_backend()?;
        let mut search = source.apply_to(context, &base);
        search.resolve_variables(&runtime_vars);

        let mut result = backend.query(cancel.clone(), search).await?;
        return print_result(result.as_mut(), cancel).await;
    }

    // Federated: one aggregator over all contexts; a failing dispatch is a
    // partial error, the remaining sources proceed.
    let aggregator = MultiSearchResult::new(base.clone())?;
    for context in &args.contexts {
        let source = config.source(context)?;
        let backend = source.build_backend()?;
        let mut search = source.apply_to(context, &base);
        search.resolve_variables(&runtime_vars);

        match backend.query(cancel.clone(), search).await {
            Ok(result) => aggregator.add(result),
            Err(err) => warn!(context, error = %err, "source dispatch failed"),
        }
    }

    let mut aggregator = aggregator;
    print_result(&mut aggregator, cancel).await
}

/// Apply CLI overrides on top of the selected template.
fn build_search(config: &Config, args: &QueryArgs) -> Result<LogSearch> {
    let template = match &args.search {
        Some(name) => config.resolve_search(name)?,
        None => LogSearch::default(),
    };

    let mut overrides = LogSearch::default();
    for pair in &args.fields {
        let (field, value) = split_pair(pair, "--field")?;
        overrides
            .legacy_fields
            .insert(field.to_string(), value.to_string());
    }
    for pair in &args.conditions {
        let (field, op) = split_pair(pair, "--condition")?;
        overrides
            .legacy_conditions
            .insert(field.to_string(), op.to_string());
    }
    if let Some(last) = &args.last {
        overrides.range.last = Opt::from(last.as_str());
    }
    if let Some(gte) = &args.gte {
        overrides.range.gte = Opt::from(gte.as_str());
    }
    if let Some(lte) = &args.lte {
        overrides.range.lte = Opt::from(lte.as_str());
    }
    if let Some(size) = args.size {
        overrides.size = Opt::Value(size);
    }
    if let Some(native) = &args.native_query {
        overrides.native_query = Opt::from(native.as_str());
    }
    if let Some(token) = &args.page_token {
        if args.contexts.len() > 1 {
            return Err(FuseError::unsupported(
                "pagination across multiple sources; issue the page token to its own backend",
            ));
        }
        overrides.page_token = Opt::from(token.as_str());
    }
    overrides.follow = args.follow;

    Ok(template.merge_into(&overrides))
}

/// Print the initial batch, then stream updates until closed or cancelled.
async fn print_result(result: &mut dyn SearchResult, cancel: CancellationToken) -> Result<()> {
    if let Some(mut errors) = result.errors() {
        tokio::spawn(async move {
            while let Some(err) = errors.recv().await {
                warn!(error = %err, "source error");
            }
        });
    }

    let (initial, updates) = result.entries(cancel.clone()).await?;
    for entry in &initial {
        println!("{}", format_entry(entry));
    }

    if let Some(mut rx) = updates {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                batch = rx.recv() => match batch {
                    Some(batch) => {
                        for entry in &batch {
                            println!("{}", format_entry(entry));
                        }
                    }
                    None => break,
                },
            }
        }
    }

    if let Some(pagination) = result.pagination() {
        if pagination.has_more {
            eprintln!("next page token: {}", pagination.next_page_token);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(contexts: &[&str]) -> QueryArgs {
        QueryArgs {
            contexts: contexts.iter().map(ToString::to_string).collect(),
            search: None,
            fields: vec!["level=ERROR".to_string()],
            conditions: vec![],
            last: Some("30m".to_string()),
            gte: None,
            lte: None,
            size: Some(100),
            native_query: None,
            follow: false,
            page_token: None,
            vars: vec![],
        }
    }

    #[test]
    fn overrides_land_in_the_search() {
        let search = build_search(&Config::default(), &args(&["a"])).unwrap();
        assert_eq!(search.legacy_fields["level"], "ERROR");
        assert_eq!(search.range.last.as_deref(), Some("30m"));
        assert_eq!(search.size, Opt::Value(100));
    }

    #[test]
    fn page_token_rejected_when_federated() {
        let mut multi = args(&["a", "b"]);
        multi.page_token = Some("10".to_string());
        assert!(build_search(&Config::default(), &multi).is_err());

        let mut single = args(&["a"]);
        single.page_token = Some("10".to_string());
        let search = build_search(&Config::default(), &single).unwrap();
        assert_eq!(search.page_token.as_deref(), Some("10"));
    }
}
