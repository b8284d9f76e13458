//! Binds every application collection for the active session.

use crate::binder::CollectionBinder;
use crate::collections::CollectionName;
use crate::config::BinderConfig;
use crate::error::SyndicError;
use crate::key::{LogicalName, TenantId};
use crate::model::{
    AdminSettings, BankTransaction, Expense, JanitorApartment, JanitorPayment, Member, Payment,
    Resident, Shop,
};
use crate::storage::backend::StorageBackend;
use crate::store::{CollectionStore, Record, SaveAck};
use tracing::info;

/// Who is signed in. Admins work on the unscoped partition, members on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Admin,
    Member(TenantId),
}

impl Session {
    pub fn tenant(self) -> Option<TenantId> {
        match self {
            Session::Admin => None,
            Session::Member(id) => Some(id),
        }
    }
}

fn session_tenant(session: Option<Session>) -> Option<TenantId> {
    session.and_then(Session::tenant)
}

pub struct SyndicWorkspace<B: StorageBackend> {
    store: CollectionStore<B>,
    session: Option<Session>,
    pub members: CollectionBinder<Member, B>,
    pub admin_settings: CollectionBinder<AdminSettings, B>,
    pub residents: CollectionBinder<Resident, B>,
    pub payments: CollectionBinder<Payment, B>,
    pub shops: CollectionBinder<Shop, B>,
    pub shop_payments: CollectionBinder<Payment, B>,
    pub expenses: CollectionBinder<Expense, B>,
    pub janitor_apartments: CollectionBinder<JanitorApartment, B>,
    pub janitor_payments: CollectionBinder<JanitorPayment, B>,
    pub bank_transactions: CollectionBinder<BankTransaction, B>,
}

impl<B: StorageBackend> SyndicWorkspace<B> {
    /// Must be called inside a Tokio runtime; every binder starts loading at once.
    pub fn open(store: CollectionStore<B>, config: BinderConfig, session: Option<Session>) -> Self {
        let tenant = session_tenant(session);
        let bind = |name: CollectionName| (name.logical_name(), name.tenant_for(tenant));
        fn binder<T: Record, B: StorageBackend>(
            store: &CollectionStore<B>,
            config: &BinderConfig,
            (name, tenant): (LogicalName, Option<TenantId>),
            initial: Vec<T>,
        ) -> CollectionBinder<T, B> {
            CollectionBinder::new(store.clone(), name, initial, tenant, *config)
        }
        info!(?session, keyspace = store.keyspace(), "opening workspace");
        Self {
            members: binder(&store, &config, bind(CollectionName::Members), Vec::new()),
            admin_settings: binder(
                &store,
                &config,
                bind(CollectionName::AdminSettings),
                vec![AdminSettings::default()],
            ),
            residents: binder(&store, &config, bind(CollectionName::Residents), Vec::new()),
            payments: binder(&store, &config, bind(CollectionName::Payments), Vec::new()),
            shops: binder(&store, &config, bind(CollectionName::Shops), Vec::new()),
            shop_payments: binder(&store, &config, bind(CollectionName::ShopPayments), Vec::new()),
            expenses: binder(&store, &config, bind(CollectionName::Expenses), Vec::new()),
            janitor_apartments: binder(
                &store,
                &config,
                bind(CollectionName::JanitorApartments),
                Vec::new(),
            ),
            janitor_payments: binder(
                &store,
                &config,
                bind(CollectionName::JanitorPayments),
                Vec::new(),
            ),
            bank_transactions: binder(
                &store,
                &config,
                bind(CollectionName::BankTransactions),
                Vec::new(),
            ),
            store,
            session,
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.session
    }

    pub fn store(&self) -> &CollectionStore<B> {
        &self.store
    }

    /// Re-scopes every member collection. Global collections are untouched.
    pub fn switch_session(&mut self, session: Option<Session>) {
        if self.session == session {
            return;
        }
        info!(from = ?self.session, to = ?session, "switching workspace session");
        self.session = session;
        let tenant = session_tenant(session);
        self.residents.set_tenant(tenant);
        self.payments.set_tenant(tenant);
        self.shops.set_tenant(tenant);
        self.shop_payments.set_tenant(tenant);
        self.expenses.set_tenant(tenant);
        self.janitor_apartments.set_tenant(tenant);
        self.janitor_payments.set_tenant(tenant);
        self.bank_transactions.set_tenant(tenant);
    }

    /// True while any member collection is still loading for the current session.
    pub fn is_loading(&self) -> bool {
        self.residents.is_loading()
            || self.payments.is_loading()
            || self.shops.is_loading()
            || self.shop_payments.is_loading()
            || self.expenses.is_loading()
            || self.janitor_apartments.is_loading()
            || self.janitor_payments.is_loading()
            || self.bank_transactions.is_loading()
    }

    pub async fn wait_ready(&self) {
        self.members.wait_ready().await;
        self.admin_settings.wait_ready().await;
        self.residents.wait_ready().await;
        self.payments.wait_ready().await;
        self.shops.wait_ready().await;
        self.shop_payments.wait_ready().await;
        self.expenses.wait_ready().await;
        self.janitor_apartments.wait_ready().await;
        self.janitor_payments.wait_ready().await;
        self.bank_transactions.wait_ready().await;
    }

    /// Issues every pending save now. Returns the outcome per flushed collection.
    pub async fn flush_all(&self) -> Vec<(CollectionName, SaveAck)> {
        let outcomes = [
            (CollectionName::Members, self.members.flush().await),
            (CollectionName::AdminSettings, self.admin_settings.flush().await),
            (CollectionName::Residents, self.residents.flush().await),
            (CollectionName::Payments, self.payments.flush().await),
            (CollectionName::Shops, self.shops.flush().await),
            (CollectionName::ShopPayments, self.shop_payments.flush().await),
            (CollectionName::Expenses, self.expenses.flush().await),
            (
                CollectionName::JanitorApartments,
                self.janitor_apartments.flush().await,
            ),
            (
                CollectionName::JanitorPayments,
                self.janitor_payments.flush().await,
            ),
            (
                CollectionName::BankTransactions,
                self.bank_transactions.flush().await,
            ),
        ];
        outcomes
            .into_iter()
            .filter_map(|(name, ack)| ack.map(|ack| (name, ack)))
            .collect()
    }

    /// Flushes pending saves, drops every binder and closes the store.
    pub async fn close(self) -> Result<Vec<(CollectionName, SaveAck)>, SyndicError> {
        let flushed = self.flush_all().await;
        let store = self.store.clone();
        drop(self);
        store.close().await?;
        Ok(flushed)
    }
}
