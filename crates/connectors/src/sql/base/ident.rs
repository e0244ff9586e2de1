/// Quotes a possibly schema-qualified identifier (`schema.table`) with the
/// given quote character. Parts that are already quoted are kept verbatim.
pub fn quote_qualified(name: &str, quote: char) -> String {
    name.split('.')
        .map(|part| quote_ident(part.trim(), quote))
        .collect::<Vec<_>>()
        .join(".")
}

/// Quotes a single identifier such as a column name.
pub fn quote_ident(name: &str, quote: char) -> String {
    quote_part(name, quote)
}

/// SQL Server style `[schema].[table]`. A `]` inside a name is doubled.
pub fn quote_bracketed(name: &str) -> String {
    name.split('.')
        .map(|part| {
            let part = part.trim();
            if part.len() >= 2 && part.starts_with('[') && part.ends_with(']') {
                part.to_string()
            } else {
                format!("[{}]", part.replace(']', "]]"))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn quote_part(part: &str, quote: char) -> String {
    if part.len() >= 2 && part.starts_with(quote) && part.ends_with(quote) {
        return part.to_string();
    }
    let doubled: String = [quote, quote].iter().collect();
    let escaped = part.replace(quote, &doubled);
    format!("{quote}{escaped}{quote}")
}
