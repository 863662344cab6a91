//! Identity resolver: address to [`Account`], created on first reference.

use cheq_store::StagedView;
use cheq_types::Address;
use tracing::debug;

use crate::error::ProjectionResult;
use crate::records::Account;

/// Load the account for `address`, creating and staging it if absent.
pub fn resolve_account(view: &mut StagedView<'_>, address: Address) -> ProjectionResult<Account> {
    let key = address.to_key();
    if let Some(account) = view.load::<Account>(&key)? {
        return Ok(account);
    }
    let account = Account::new(address);
    view.stage(&account)?;
    debug!(account = %key, "account created");
    Ok(account)
}

/// Load the account for `address` without creating it.
pub fn load_account(view: &StagedView<'_>, address: Address) -> ProjectionResult<Option<Account>> {
    Ok(view.load::<Account>(&address.to_key())?)
}

/// Resolve an account, apply `f`, and stage the result.
///
/// Handlers update accounts one at a time through this so that two roles
/// held by the same address (drawer == recipient) see each other's writes.
pub fn update_account<T>(
    view: &mut StagedView<'_>,
    address: Address,
    f: impl FnOnce(&mut Account) -> T,
) -> ProjectionResult<T> {
    let mut account = resolve_account(view, address)?;
    let out = f(&mut account);
    view.stage(&account)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::InstrumentCategory;
    use cheq_store::{EntityStore, EntityStoreExt, InMemoryEntityStore};

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn resolve_creates_once() {
        let store = InMemoryEntityStore::new();
        let mut view = StagedView::new(&store);

        let first = resolve_account(&mut view, addr(1)).unwrap();
        assert_eq!(first, Account::new(addr(1)));
        assert_eq!(view.pending().len(), 1);

        store.apply(view.into_batch()).unwrap();

        let mut view = StagedView::new(&store);
        resolve_account(&mut view, addr(1)).unwrap();
        assert!(view.pending().is_empty());
    }

    #[test]
    fn load_does_not_create() {
        let store = InMemoryEntityStore::new();
        let view = StagedView::new(&store);
        assert!(load_account(&view, addr(9)).unwrap().is_none());
        assert!(view.pending().is_empty());
    }

    #[test]
    fn updates_to_the_same_address_compose() {
        let store = InMemoryEntityStore::new();
        let mut view = StagedView::new(&store);

        update_account(&mut view, addr(1), |a| a.track(InstrumentCategory::Sent, "0x7")).unwrap();
        update_account(&mut view, addr(1), |a| a.track(InstrumentCategory::Received, "0x7"))
            .unwrap();
        store.apply(view.into_batch()).unwrap();

        let account: Account = store.load(&addr(1).to_key()).unwrap().unwrap();
        assert_eq!(account.sent, 1);
        assert_eq!(account.received, 1);
    }
}
