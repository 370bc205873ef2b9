//! The `fields` subcommand: distinct-value discovery.

use tokio_util::sync::CancellationToken;

use crate::cli::FieldsArgs;
use crate::config::Config;
use crate::error::Result;
use crate::opt::Opt;
use crate::search::LogSearch;

/// Collect and print distinct values for the requested fields.
pub async fn run(config: Config, args: FieldsArgs) -> Result<()> {
    let mut search = match &args.search {
        Some(name) => config.resolve_search(name)?,
        None => LogSearch::default(),
    };
    if let Some(last) = &args.last {
        search.range.last = Opt::from(last.as_str());
    }
    if let Some(size) = args.size {
        search.size = Opt::Value(size);
    }

    let source = config.source(&args.context)?;
    let backend = source.build_backend()?;
    let search = source.apply_to(&args.context, &search);

    let values = backend
        .field_values(CancellationToken::new(), search, &args.fields)
        .await?;

    for (field, distinct) in &values {
        println!("{field}: {}", distinct.join(", "));
    }
    Ok(())
}
