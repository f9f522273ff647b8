pub mod auth;
pub mod document;
pub mod framework;

pub use auth::*;
pub use document::*;

/// Untyped entity record flowing through the pipeline: JSON object in,
/// JSON object out. Shape is validated against a `Schema` at coercion
/// time, never at construction time.
pub type Entity = serde_json::Map<String, serde_json::Value>;

/// Convert a camelCase schema name to the snake_case form used for
/// route segments and SQL table/column names.
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);

    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::camel_to_snake;

    #[test]
    fn camel_to_snake_handles_plain_and_mixed_names() {
        assert_eq!(camel_to_snake("groupOwner"), "group_owner");
        assert_eq!(camel_to_snake("user"), "user");
        assert_eq!(camel_to_snake("orderItemDetail"), "order_item_detail");
    }
}
