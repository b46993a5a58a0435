// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parameter alias normalization.
//!
//! Hosts send the same semantic field under different spellings
//! (`productId`, `product_id`, `item_id`, ...). The table below maps a closed
//! set of recognized aliases to one canonical name. It is applied once, when
//! the event is built.
//!
//! Precedence when several spellings are present:
//!
//! | Present keys | Result |
//! |--------------|--------|
//! | canonical + aliases | canonical value kept, aliases discarded |
//! | several aliases | the alias listed first in [`ALIASES`] wins |

use crate::params::Params;

/// One canonical field and the spellings folded into it.
#[derive(Debug, Clone, Copy)]
pub struct Alias {
	pub canonical: &'static str,
	pub aliases: &'static [&'static str],
}

pub const ALIASES: &[Alias] = &[
	Alias {
		canonical: "value",
		aliases: &["amount", "Amount", "price", "Price", "total", "revenue", "Value"],
	},
	Alias {
		canonical: "currency",
		aliases: &["currencyCode", "currency_code", "Currency"],
	},
	Alias {
		canonical: "product_id",
		aliases: &["productId", "ProductId", "product_ID", "item_id", "itemId", "sku"],
	},
	Alias {
		canonical: "transaction_id",
		aliases: &["transactionId", "TransactionId", "orderId", "order_id", "OrderId"],
	},
	Alias {
		canonical: "quantity",
		aliases: &["qty", "Quantity", "num_items"],
	},
];

/// Returns the canonical name for `key` when it is a recognized alias.
pub fn canonical_name(key: &str) -> Option<&'static str> {
	ALIASES
		.iter()
		.find(|entry| entry.aliases.contains(&key))
		.map(|entry| entry.canonical)
}

/// Folds every recognized alias into its canonical field.
pub fn normalize(params: Params) -> Params {
	let mut aliased = Params::new();
	let mut normalized = Params::new();

	for (key, value) in params {
		if canonical_name(&key).is_some() {
			aliased.set(key, value);
		} else {
			normalized.set(key, value);
		}
	}

	for entry in ALIASES {
		if normalized.contains_key(entry.canonical) {
			continue;
		}
		if let Some(value) = entry.aliases.iter().find_map(|alias| aliased.get(alias)) {
			normalized.set(entry.canonical, value.clone());
		}
	}

	normalized
}
