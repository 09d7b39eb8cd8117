pub mod credentials;
pub mod deliver;
pub mod store;
pub mod wcpay;
pub mod xero;

pub use credentials::CredentialStore;
pub use deliver::DeliveryService;
pub use wcpay::WooPaymentsClient;
pub use xero::XeroClient;
