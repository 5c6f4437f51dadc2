// Server-rendered HTML pages

pub mod admin;
pub mod items;

use std::fmt::Write;

use crate::middleware::AuthenticatedUser;

pub const SITE_TITLE: &str = "Collectify";

/// Shown for items without photos.
pub const PLACEHOLDER_IMAGE: &str = "https://placehold.co/600x400/eee/ccc?text=No+Image";

const STYLE: &str = "\
body{font-family:system-ui,sans-serif;margin:0;background:#f6f6f4;color:#222}\
header{background:#2d3142;color:#fff;padding:.8rem 1.5rem;display:flex;gap:1.5rem;align-items:center}\
header a{color:#fff;text-decoration:none}\
main{max-width:1100px;margin:1.5rem auto;padding:0 1rem}\
.banner{padding:.6rem 1rem;border-radius:4px;margin-bottom:1rem}\
.banner.success{background:#e3f4e1;color:#1d5e1a}\
.banner.error{background:#fbe3e3;color:#8a1c1c}\
.grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(220px,1fr));gap:1rem}\
.card{background:#fff;border-radius:6px;overflow:hidden;box-shadow:0 1px 3px rgba(0,0,0,.1)}\
.card img{width:100%;height:160px;object-fit:cover}\
.card .body{padding:.6rem .8rem}\
table.specs td{padding:.25rem .8rem .25rem 0;vertical-align:top}\
form.edit label{display:block;margin-top:.8rem;font-weight:600}\
form.edit input,form.edit select,form.edit textarea{width:100%;padding:.35rem;box-sizing:border-box}\
.photos img{max-width:260px;margin:0 .5rem .5rem 0;border-radius:4px}";

/// Escapes text for element content and quoted attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `/uploads/<key>` with the key percent-encoded.
pub fn upload_url(key: &str) -> String {
    format!("/uploads/{}", urlencoding::encode(key))
}

pub fn banner(kind: &str, message: Option<&str>) -> String {
    match message.map(str::trim).filter(|m| !m.is_empty()) {
        Some(message) => format!("<div class=\"banner {}\">{}</div>", kind, escape(message)),
        None => String::new(),
    }
}

pub fn layout(title: &str, user: Option<&AuthenticatedUser>, body: &str) -> String {
    let mut nav = String::from("<a href=\"/\">Collection</a>");
    match user {
        Some(user) if user.is_admin => {
            let _ = write!(
                nav,
                "<a href=\"/admin.html\">Admin</a><span>{}</span>",
                escape(&user.username)
            );
        }
        Some(user) => {
            let _ = write!(nav, "<span>{}</span>", escape(&user.username));
        }
        None => {}
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title} - {site}</title>\n<style>{style}</style>\n</head>\n<body>\n\
         <header><strong>{site}</strong>{nav}</header>\n<main>\n{body}\n</main>\n</body>\n</html>\n",
        title = escape(title),
        site = SITE_TITLE,
        style = STYLE,
        nav = nav,
        body = body,
    )
}

pub fn not_found_page(message: &str) -> String {
    layout(
        "Not found",
        None,
        &format!(
            "<h1>Not found</h1><p>{}</p><p><a href=\"/\">Back to the collection</a></p>",
            escape(message)
        ),
    )
}
