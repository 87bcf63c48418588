//! `rvault query`: similarity search with an optional metadata filter.

use anyhow::Result;
use ragvault_core::filter::MetadataFilter;
use ragvault_core::search::QueryRequest;

use crate::config::Config;
use crate::db;
use crate::input::{parse_embedding, parse_json_arg};

pub async fn run_query(
    config: &Config,
    embedding: &str,
    limit: Option<i64>,
    filter: Option<&str>,
    probes: Option<usize>,
    json: bool,
) -> Result<()> {
    let embedding = parse_embedding(embedding)?;
    let filter = match filter {
        Some(raw) => MetadataFilter::from_value(parse_json_arg(raw, "filter")?)?,
        None => MetadataFilter::any(),
    };

    let engine = db::open_engine(config).await?;
    let req = QueryRequest {
        limit,
        probes,
        ..QueryRequest::new(&embedding, &filter)
    };
    let results = engine.query_documents(&req).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in results.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, m.similarity, m.id);
        println!(
            "    content: \"{}\"",
            excerpt(&m.content, 120).replace('\n', " ").trim()
        );
        if !m.metadata.is_empty() {
            println!("    metadata: {}", serde_json::Value::Object(m.metadata.clone()));
        }
        println!();
    }
    Ok(())
}

/// First `max_chars` characters of `text`, with an ellipsis if cut.
fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("abcdef", 3), "abc…");
        assert_eq!(excerpt("ééééé", 2), "éé…");
    }
}
