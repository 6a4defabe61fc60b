/// Separator used between chain links in a rendered auth chain.
pub const AUTH_CHAIN_SEPARATOR: char = ';';

/// Separator between device id and module id in a composite identity key.
pub const IDENTITY_KEY_SEPARATOR: char = '/';

/// Capability string marking an identity as edge-capable.
pub const EDGE_CAPABILITY: &str = "iotEdge";

/// Upper bound on auth-chain length.
///
/// Guards the chain walk against scope cycles introduced by malformed
/// registry data; any chain longer than this resolves to `None`.
pub const MAX_AUTH_CHAIN_DEPTH: usize = 30;
