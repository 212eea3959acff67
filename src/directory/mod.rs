//! Directory service client: registration handshake, public-key lookup and
//! new-mail notifications over a persistent connection.

mod addresses;
mod client;
mod connection;
mod events;

pub use addresses::{AddressBook, AddressSource, HttpAddressSource};
pub use client::{
    DirectoryClient, DirectoryNotice, KeyBackup, KeyBackupPrompt, RegistrationState, Subscription,
};
pub use connection::{
    memory_pair, Connection, Connector, MemoryConnector, ServerEnd, TcpConnector,
};
pub use events::{ClientEvent, DirectoryEntry, ServerEvent};
