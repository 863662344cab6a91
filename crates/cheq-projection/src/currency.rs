//! Currency registry: ERC-20 contract address to [`Erc20`].

use cheq_store::{EntityStore, EntityStoreExt, StagedView};
use cheq_types::Address;
use tracing::{debug, info};

use crate::error::ProjectionResult;
use crate::records::Erc20;

/// Load the currency record for `address`, creating and staging it if absent.
pub fn resolve_currency(view: &mut StagedView<'_>, address: Address) -> ProjectionResult<Erc20> {
    let key = address.to_key();
    if let Some(currency) = view.load::<Erc20>(&key)? {
        return Ok(currency);
    }
    let currency = Erc20::new(address);
    view.stage(&currency)?;
    debug!(currency = %key, "currency registered");
    Ok(currency)
}

/// Fill in token metadata that is still unknown.
///
/// Writes directly to the store; this runs outside event projection, from an
/// enrichment job. Fields already set are left alone. Returns the record as
/// stored, or `None` if the currency was never registered.
pub fn enrich_currency<S: EntityStore + ?Sized>(
    store: &S,
    address: Address,
    symbol: Option<String>,
    decimals: Option<u8>,
) -> ProjectionResult<Option<Erc20>> {
    let Some(mut currency) = store.load::<Erc20>(&address.to_key())? else {
        return Ok(None);
    };
    let mut changed = false;
    if currency.symbol.is_none() && symbol.is_some() {
        currency.symbol = symbol;
        changed = true;
    }
    if currency.decimals.is_none() && decimals.is_some() {
        currency.decimals = decimals;
        changed = true;
    }
    if changed {
        store.save(&currency)?;
        info!(currency = %address, symbol = ?currency.symbol, decimals = ?currency.decimals, "currency enriched");
    }
    Ok(Some(currency))
}
