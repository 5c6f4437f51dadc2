use std::fmt::Write;

use crate::middleware::AuthenticatedUser;
use crate::models::Category;
use crate::schema::FieldKind;

use super::{escape, layout};

fn field_details(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Text => String::new(),
        FieldKind::Number { min, max, step } => {
            let bound = |b: &Option<f64>| b.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
            format!("min {} / max {} / step {}", bound(min), bound(max), step)
        }
        FieldKind::Select { options } => options.join(", "),
    }
}

pub fn admin_page(categories: &[Category], user: &AuthenticatedUser) -> String {
    let mut body = String::from("<h1>Admin Panel</h1><h2>Categories</h2>");

    if categories.is_empty() {
        body.push_str("<p>No categories yet.</p>");
    }

    for category in categories {
        let _ = write!(
            body,
            "<section><h3>{} <small>({} items)</small></h3>",
            escape(&category.name),
            category.item_count
        );
        if category.fields.is_empty() {
            body.push_str("<p>No specification fields.</p></section>");
            continue;
        }
        body.push_str(
            "<table class=\"specs\"><tr><th>Order</th><th>Key</th><th>Label</th><th>Type</th><th>Details</th></tr>",
        );
        for field in &category.fields {
            let _ = write!(
                body,
                "<tr><td>{}</td><td><code>{}</code></td><td>{}</td><td>{}</td><td>{}</td></tr>",
                field.display_order,
                escape(&field.key),
                escape(&field.label),
                field.type_name(),
                escape(&field_details(&field.kind))
            );
        }
        body.push_str("</table></section>");
    }

    body.push_str(
        "<p>Categories and their fields are managed through <code>/api/categories</code>.</p>",
    );
    layout("Admin Panel", Some(user), &body)
}
