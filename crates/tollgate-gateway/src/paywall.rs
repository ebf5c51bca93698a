//! Self-contained HTML paywall served to browsers on a 402.
//!
//! The page reads its parameters from an embedded JSON block, has the
//! injected wallet send the exact token transfer, then replays the request
//! with the evidence token in `paymentToken` and shows the JSON result.

use tollgate_protocol::network::ASSET_DECIMALS;

use crate::error::Challenge;

const TEMPLATE: &str = include_str!("paywall.html");
const CONFIG_PLACEHOLDER: &str = "{{TOLLGATE_CONFIG}}";
const TITLE_PLACEHOLDER: &str = "{{TITLE}}";

/// Render the paywall page for one challenge.
pub fn render(challenge: &Challenge) -> String {
    let requirement = &challenge.requirement;
    let network = challenge.network;
    let config = serde_json::json!({
        "network": network.id(),
        "networkName": network.display_name(),
        "chainId": format!("0x{:x}", network.chain_id()),
        "rpcUrl": network.rpc_url(),
        "explorer": network.explorer_base(),
        "asset": format!("{:#x}", requirement.asset),
        "assetSymbol": network.asset_symbol(),
        "decimals": ASSET_DECIMALS,
        "amount": requirement.amount,
        "amountMicroUnits": requirement.amount_micro_units.to_string(),
        "recipient": format!("{:#x}", requirement.recipient),
        "resource": requirement.resource,
        "apiName": challenge.api_name,
        "endpointName": challenge.endpoint_name,
    });

    let title = format!("{} / {}", challenge.api_name, challenge.endpoint_name);
    TEMPLATE
        .replace(TITLE_PLACEHOLDER, &escape_html(&title))
        .replace(CONFIG_PLACEHOLDER, &script_safe_json(&config))
}

/// JSON that cannot close the surrounding `<script>` element.
fn script_safe_json(value: &serde_json::Value) -> String {
    value
        .to_string()
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

fn escape_html(text: &str) -> String {
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
