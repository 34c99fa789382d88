// Library root: the tab bidding coordination core.
//
// Leaf to root: platform groups and wire types, the bidding registry, the
// synchronization guard, the action dispatcher, the update ingestor, the
// adjudication snapshotter and the coordinator that owns them all.

pub mod adjudication;
pub mod colors;
pub mod coordinator;
pub mod db;
pub mod dispatch;
pub mod guard;
pub mod ingest;
pub mod platform;
pub mod protocol;
pub mod registry;
pub mod ws_server;
