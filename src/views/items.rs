use std::fmt::Write;

use serde_json::Value;

use crate::middleware::AuthenticatedUser;
use crate::models::{Category, ItemDetail};
use crate::schema::{display_value, legacy_text, FieldKind, SpecificationField, FORM_FIELD_PREFIX};

use super::{banner, escape, layout, upload_url, PLACEHOLDER_IMAGE};

/// Inputs of the collection page.
pub struct IndexPage<'a> {
    pub categories: &'a [Category],
    pub items: &'a [ItemDetail],
    pub category_id: Option<i64>,
    pub search: Option<&'a str>,
    pub success: Option<&'a str>,
    pub error: Option<&'a str>,
    pub user: Option<&'a AuthenticatedUser>,
}

fn photo_src(item: &ItemDetail) -> String {
    item.primary_photo()
        .map(|p| upload_url(&p.file_path))
        .unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string())
}

fn category_options(categories: &[Category], selected: Option<i64>) -> String {
    let mut out = String::new();
    for category in categories {
        let _ = write!(
            out,
            "<option value=\"{}\"{}>{}</option>",
            category.id,
            if selected == Some(category.id) { " selected" } else { "" },
            escape(&category.name)
        );
    }
    out
}

pub fn index_page(page: &IndexPage<'_>) -> String {
    let mut body = String::new();
    body.push_str(&banner("success", page.success));
    body.push_str(&banner("error", page.error));

    let _ = write!(
        body,
        "<h1>My Collection</h1>\
         <form method=\"get\" action=\"/\" class=\"filters\">\
         <select name=\"category_id\"><option value=\"\">All categories</option>{}</select> \
         <input type=\"search\" name=\"search\" placeholder=\"Search name, brand, description\" value=\"{}\"> \
         <button type=\"submit\">Filter</button></form>",
        category_options(page.categories, page.category_id),
        escape(page.search.unwrap_or_default())
    );

    if page.items.is_empty() {
        body.push_str("<p>No items found.</p>");
        return layout("My Collection", page.user, &body);
    }

    body.push_str("<div class=\"grid\">");
    let is_admin = page.user.is_some_and(|u| u.is_admin);
    for item in page.items {
        let brand = legacy_text(item.values(), "brand");
        let _ = write!(
            body,
            "<div class=\"card\"><a href=\"/item/{id}\"><img src=\"{src}\" alt=\"{name}\"></a>\
             <div class=\"body\"><a href=\"/item/{id}\"><strong>{name}</strong></a>\
             <div>{category}</div>{brand}{edit}</div></div>",
            id = item.item.id,
            src = escape(&photo_src(item)),
            name = escape(&item.item.name),
            category = escape(&item.item.category_name),
            brand = if brand.is_empty() {
                String::new()
            } else {
                format!("<div>{}</div>", escape(&brand))
            },
            edit = if is_admin {
                format!("<a href=\"/item/{}/edit\">Edit</a>", item.item.id)
            } else {
                String::new()
            },
        );
    }
    body.push_str("</div>");

    layout("My Collection", page.user, &body)
}

pub fn item_page(item: &ItemDetail, user: Option<&AuthenticatedUser>) -> String {
    let mut body = String::new();
    let _ = write!(
        body,
        "<p><a href=\"/\">&larr; Back</a></p><h1>{}</h1><p>{}</p>",
        escape(&item.item.name),
        escape(&item.item.category_name)
    );
    if user.is_some_and(|u| u.is_admin) {
        let _ = write!(body, "<p><a href=\"/item/{}/edit\">Edit item</a></p>", item.item.id);
    }

    body.push_str("<div class=\"photos\">");
    if item.photos.is_empty() {
        let _ = write!(body, "<img src=\"{}\" alt=\"No image\">", PLACEHOLDER_IMAGE);
    }
    for photo in &item.photos {
        let _ = write!(
            body,
            "<img src=\"{}\" alt=\"{}\">",
            escape(&upload_url(&photo.file_path)),
            escape(photo.filename.as_deref().unwrap_or(&photo.file_path))
        );
    }
    body.push_str("</div>");

    let specs = item.ordered_specifications();
    if !specs.is_empty() {
        body.push_str("<h2>Specifications</h2><table class=\"specs\">");
        for spec in &specs {
            let _ = write!(
                body,
                "<tr><td>{}</td><td>{}</td></tr>",
                escape(&spec.label),
                escape(&display_value(&spec.value))
            );
        }
        body.push_str("</table>");
    }

    let description = legacy_text(item.values(), "description");
    if !description.is_empty() {
        let _ = write!(body, "<h2>Description</h2><p>{}</p>", escape(&description));
    }

    if !item.urls.is_empty() {
        body.push_str("<h2>Links</h2><ul>");
        for url in &item.urls {
            let url = escape(&url.url);
            let _ = write!(body, "<li><a href=\"{0}\" rel=\"noopener\">{0}</a></li>", url);
        }
        body.push_str("</ul>");
    }

    layout(&item.item.name, user, &body)
}

/// Form control for one specification field, named `spec.<key>`.
pub fn spec_input(field: &SpecificationField, value: Option<&Value>) -> String {
    let name = escape(&format!("{}{}", FORM_FIELD_PREFIX, field.key));
    let current = value.map(display_value).unwrap_or_default();

    let control = match &field.kind {
        FieldKind::Text => format!(
            "<input type=\"text\" id=\"{name}\" name=\"{name}\" value=\"{value}\" placeholder=\"{placeholder}\">",
            name = name,
            value = escape(&current),
            placeholder = escape(&field.placeholder),
        ),
        FieldKind::Number { min, max, step } => {
            let mut attrs = format!(" step=\"{}\"", step);
            if let Some(min) = min {
                let _ = write!(attrs, " min=\"{}\"", min);
            }
            if let Some(max) = max {
                let _ = write!(attrs, " max=\"{}\"", max);
            }
            format!(
                "<input type=\"number\" id=\"{name}\" name=\"{name}\" value=\"{value}\" placeholder=\"{placeholder}\"{attrs}>",
                name = name,
                value = escape(&current),
                placeholder = escape(&field.placeholder),
                attrs = attrs,
            )
        }
        FieldKind::Select { options } => {
            let mut html = format!(
                "<select id=\"{name}\" name=\"{name}\"><option value=\"\">-- Select --</option>",
                name = name
            );
            for option in options {
                let _ = write!(
                    html,
                    "<option value=\"{0}\"{1}>{0}</option>",
                    escape(option),
                    if *option == current { " selected" } else { "" }
                );
            }
            // Keep a stored value that is no longer among the options.
            if !current.is_empty() && !options.contains(&current) {
                let _ = write!(
                    html,
                    "<option value=\"{0}\" selected>{0}</option>",
                    escape(&current)
                );
            }
            html.push_str("</select>");
            html
        }
    };

    format!("<label for=\"{}\">{}</label>{}", name, escape(&field.label), control)
}

pub fn edit_page(
    item: &ItemDetail,
    categories: &[Category],
    error: Option<&str>,
    user: Option<&AuthenticatedUser>,
) -> String {
    let values = item.values();
    let mut body = String::new();
    body.push_str(&banner("error", error));

    let _ = write!(
        body,
        "<p><a href=\"/item/{id}\">&larr; Back to item</a></p><h1>Edit {name}</h1>\
         <form class=\"edit\" method=\"post\" action=\"/item/{id}/edit\" enctype=\"multipart/form-data\">\
         <label for=\"name\">Name</label><input type=\"text\" id=\"name\" name=\"name\" value=\"{name}\" required>\
         <label for=\"category_id\">Category</label><select id=\"category_id\" name=\"category_id\" required>{categories}</select>\
         <label for=\"brand\">Brand</label><input type=\"text\" id=\"brand\" name=\"brand\" value=\"{brand}\">\
         <label for=\"description\">Description</label><textarea id=\"description\" name=\"description\" rows=\"4\">{description}</textarea>",
        id = item.item.id,
        name = escape(&item.item.name),
        categories = category_options(categories, Some(item.item.category_id)),
        brand = escape(&legacy_text(values, "brand")),
        description = escape(&legacy_text(values, "description")),
    );

    if !item.fields.is_empty() {
        body.push_str("<fieldset><legend>Specifications</legend>");
        for field in &item.fields {
            body.push_str(&spec_input(field, values.get(&field.key)));
        }
        body.push_str("</fieldset>");
    }

    body.push_str("<label>Links</label>");
    for url in &item.urls {
        let _ = write!(
            body,
            "<input type=\"url\" name=\"urls[]\" value=\"{}\">",
            escape(&url.url)
        );
    }
    body.push_str("<input type=\"url\" name=\"urls[]\" placeholder=\"https://\">");

    body.push_str(
        "<label for=\"photos\">Add photos</label>\
         <input type=\"file\" id=\"photos\" name=\"photos[]\" accept=\".png,.jpg,.jpeg,.gif\" multiple>\
         <p><button type=\"submit\">Save</button></p></form>",
    );

    layout(&format!("Edit {}", item.item.name), user, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemRow, PhotoModel};
    use crate::schema::{SchemaDocument, SpecificationValues};
    use chrono::Utc;
    use serde_json::json;
    use sqlx::types::Json;

    fn fields() -> Vec<SpecificationField> {
        SchemaDocument::from_value(json!([
            {"key": "artist", "label": "Artist", "placeholder": "Who?"},
            {"key": "rpm", "label": "RPM", "type": "number", "min": 33, "max": 78},
            {"key": "condition", "label": "Condition", "type": "select", "options": ["Mint", "Good"]}
        ]))
        .unwrap()
        .into_fields()
        .unwrap()
    }

    fn item(values: serde_json::Value, photos: Vec<PhotoModel>) -> ItemDetail {
        let values: SpecificationValues = match values {
            serde_json::Value::Object(map) => map,
            _ => SpecificationValues::new(),
        };
        ItemDetail {
            item: ItemRow {
                id: 7,
                category_id: 1,
                category_name: "Records".to_string(),
                name: "Kind of <Blue>".to_string(),
                specification_values: Json(values),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            fields: fields(),
            photos,
            urls: vec![],
        }
    }

    #[test]
    fn test_spec_input_by_kind() {
        let fields = fields();

        let text = spec_input(&fields[0], Some(&json!("Miles \"Davis\"")));
        assert!(text.contains("type=\"text\""));
        assert!(text.contains("name=\"spec.artist\""));
        assert!(text.contains("value=\"Miles &quot;Davis&quot;\""));
        assert!(text.contains("placeholder=\"Who?\""));

        let number = spec_input(&fields[1], Some(&json!(45)));
        assert!(number.contains("type=\"number\""));
        assert!(number.contains("min=\"33\""));
        assert!(number.contains("max=\"78\""));
        assert!(number.contains("step=\"1\""));
        assert!(number.contains("value=\"45\""));

        let select = spec_input(&fields[2], Some(&json!("Good")));
        assert!(select.contains("<option value=\"Good\" selected>Good</option>"));
        assert!(select.contains("<option value=\"Mint\">Mint</option>"));
    }

    #[test]
    fn test_select_keeps_retired_option() {
        let select = spec_input(&fields()[2], Some(&json!("Fair")));
        assert!(select.contains("<option value=\"Fair\" selected>Fair</option>"));
    }

    #[test]
    fn test_item_page_lists_specs_in_order() {
        let page = item_page(&item(json!({"condition": "Mint", "artist": "Miles Davis"}), vec![]), None);
        let artist = page.find("Miles Davis").unwrap();
        let condition = page.find("Mint").unwrap();
        assert!(artist < condition);
        assert!(page.contains("Kind of &lt;Blue&gt;"));
        assert!(page.contains(PLACEHOLDER_IMAGE));
        assert!(!page.contains("/edit"));
    }

    #[test]
    fn test_index_uses_primary_photo() {
        let photos = vec![
            PhotoModel {
                id: 1,
                item_id: 7,
                file_path: "item_7_aaaa0000_side.png".to_string(),
                filename: Some("side.png".to_string()),
                is_primary: false,
            },
            PhotoModel {
                id: 2,
                item_id: 7,
                file_path: "item_7_bbbb1111_front.png".to_string(),
                filename: Some("front.png".to_string()),
                is_primary: true,
            },
        ];
        let items = vec![item(json!({}), photos)];
        let html = index_page(&IndexPage {
            categories: &[],
            items: &items,
            category_id: None,
            search: Some("blue"),
            success: Some("Item updated successfully"),
            error: None,
            user: None,
        });
        assert!(html.contains("/uploads/item_7_bbbb1111_front.png"));
        assert!(html.contains("value=\"blue\""));
        assert!(html.contains("banner success"));
    }

    #[test]
    fn test_edit_page_renders_dynamic_fields() {
        let html = edit_page(&item(json!({"rpm": 33}), vec![]), &[], Some("Name is required"), None);
        assert!(html.contains("name=\"spec.artist\""));
        assert!(html.contains("name=\"spec.rpm\""));
        assert!(html.contains("name=\"spec.condition\""));
        assert!(html.contains("enctype=\"multipart/form-data\""));
        assert!(html.contains("Name is required"));
    }
}
