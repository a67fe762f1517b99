//! HTML consent page.

use crate::oauth::ConsentView;

/// Render the approve/deny page for a pending authorization request.
///
/// All values are HTML-escaped.
pub fn render_consent_page(view: &ConsentView) -> String {
    let scope_html = view
        .scope
        .as_deref()
        .map(|scope| format!(r#"<p class="detail">Scope: <code>{}</code></p>"#, html_escape(scope)))
        .unwrap_or_default();
    let resource_html = view
        .resource
        .as_deref()
        .map(|resource| {
            format!(r#"<p class="detail">Resource: <code>{}</code></p>"#, html_escape(resource))
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Authorize - {brand}</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 420px; width: 100%; }}
h1 {{ font-size: 20px; margin: 0 0 8px; color: #333; }}
.subtitle {{ color: #666; font-size: 14px; margin: 0 0 16px; }}
.detail {{ color: #444; font-size: 13px; margin: 4px 0; word-break: break-all; }}
.actions {{ display: flex; gap: 12px; margin-top: 24px; }}
button {{ flex: 1; padding: 10px; border: none; border-radius: 4px; font-size: 14px; font-weight: 500; cursor: pointer; }}
.approve {{ background: #4a90d9; color: #fff; }}
.approve:hover {{ background: #357abd; }}
.deny {{ background: #eee; color: #333; }}
</style>
</head>
<body>
<div class="card">
<h1>{brand}</h1>
<p class="subtitle"><strong>{client_id}</strong> is requesting access to your account</p>
{scope_html}{resource_html}
<form method="POST" action="/oauth/consent">
<input type="hidden" name="state" value="{state}">
<div class="actions">
<button class="deny" type="submit" name="decision" value="deny">Deny</button>
<button class="approve" type="submit" name="decision" value="approve">Approve</button>
</div>
</form>
</div>
</body>
</html>"#,
        brand = html_escape(&view.brand_name),
        client_id = html_escape(&view.client_id),
        state = html_escape(&view.state),
        scope_html = scope_html,
        resource_html = resource_html,
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
