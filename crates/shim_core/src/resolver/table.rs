//! The static interface table.
//!
//! Each family lists the prefixes that identify it, the historical version
//! tokens it accepts, the adapter shape each token maps to and the
//! capabilities resolving that token raises. Rows of a family are ordered
//! oldest to newest and capabilities only accumulate along that order.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Capability latches raised by resolving newer interface versions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        /// Game server callers understand the IPv6 aware server calls.
        const GAMESERVER_IPV6 = 1 << 0;
        /// Client-interface callers understand the IPv6 aware networking calls.
        const CLIENT_IPV6 = 1 << 1;
    }
}

/// Interface families known to the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    Client,
    GameServer,
    GameServerStats,
    User,
    Friends,
    Utils,
    Matchmaking,
    MatchmakingServers,
    UserStats,
    Apps,
    Networking,
    NetworkingSockets,
    NetworkingSocketsSerialized,
    NetworkingMessages,
    NetworkingUtils,
    RemoteStorage,
    Screenshots,
    Http,
    UnifiedMessages,
    Controller,
    Ugc,
    AppList,
    Music,
    MusicRemote,
    HtmlSurface,
    Inventory,
    Video,
    MasterServerUpdater,
    GameSearch,
    Parties,
    Input,
    RemotePlay,
    ParentalSettings,
    AppTicket,
    GameCoordinator,
    Tv,
}

impl Family {
    /// Name used in configuration files and logs.
    pub fn name(self) -> &'static str {
        match self {
            Family::Client => "SteamClient",
            Family::GameServer => "SteamGameServer",
            Family::GameServerStats => "SteamGameServerStats",
            Family::User => "SteamUser",
            Family::Friends => "SteamFriends",
            Family::Utils => "SteamUtils",
            Family::Matchmaking => "SteamMatchMaking",
            Family::MatchmakingServers => "SteamMatchMakingServers",
            Family::UserStats => "SteamUserStats",
            Family::Apps => "SteamApps",
            Family::Networking => "SteamNetworking",
            Family::NetworkingSockets => "SteamNetworkingSockets",
            Family::NetworkingSocketsSerialized => "SteamNetworkingSocketsSerialized",
            Family::NetworkingMessages => "SteamNetworkingMessages",
            Family::NetworkingUtils => "SteamNetworkingUtils",
            Family::RemoteStorage => "SteamRemoteStorage",
            Family::Screenshots => "SteamScreenshots",
            Family::Http => "SteamHTTP",
            Family::UnifiedMessages => "SteamUnifiedMessages",
            Family::Controller => "SteamController",
            Family::Ugc => "SteamUGC",
            Family::AppList => "SteamAppList",
            Family::Music => "SteamMusic",
            Family::MusicRemote => "SteamMusicRemote",
            Family::HtmlSurface => "SteamHTMLSurface",
            Family::Inventory => "SteamInventory",
            Family::Video => "SteamVideo",
            Family::MasterServerUpdater => "SteamMasterServerUpdater",
            Family::GameSearch => "SteamGameSearch",
            Family::Parties => "SteamParties",
            Family::Input => "SteamInput",
            Family::RemotePlay => "SteamRemotePlay",
            Family::ParentalSettings => "SteamParentalSettings",
            Family::AppTicket => "SteamAppTicket",
            Family::GameCoordinator => "SteamGameCoordinator",
            Family::Tv => "SteamTV",
        }
    }

    /// Looks a family up by its configuration name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Family> {
        BUILTIN_FAMILIES
            .iter()
            .map(|spec| spec.family)
            .find(|family| family.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which role's implementation serves a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Served by the role of the requesting pipe.
    PerRole,
    ClientOnly,
    ServerOnly,
}

/// A concrete historical call shape of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterShape {
    pub family: Family,
    pub revision: u16,
}

impl fmt::Display for AdapterShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}{:03}", self.family.name(), self.revision)
    }
}

/// One accepted version token.
#[derive(Debug, Clone, Copy)]
pub struct Revision {
    pub token: &'static str,
    pub revision: u16,
    pub caps: Capabilities,
}

pub const fn rev(token: &'static str, revision: u16) -> Revision {
    Revision {
        token,
        revision,
        caps: Capabilities::empty(),
    }
}

pub const fn rev_caps(token: &'static str, revision: u16, caps: Capabilities) -> Revision {
    Revision {
        token,
        revision,
        caps,
    }
}

/// Everything the resolver knows about one family.
#[derive(Debug, Clone, Copy)]
pub struct FamilySpec {
    pub family: Family,
    pub prefixes: &'static [&'static str],
    /// Known historical tokens, oldest first.
    pub revisions: &'static [Revision],
    /// Shape used for the newest token and for any unrecognized suffix.
    pub latest: Revision,
    pub scope: Scope,
    /// Client pipes may resolve this family without a logged-in user.
    pub user_optional: bool,
    /// Token the legacy flat accessor asks for unless overridden.
    pub legacy_default: Option<&'static str>,
}

impl FamilySpec {
    pub const fn new(
        family: Family,
        prefixes: &'static [&'static str],
        revisions: &'static [Revision],
        latest: Revision,
        scope: Scope,
    ) -> Self {
        Self {
            family,
            prefixes,
            revisions,
            latest,
            scope,
            user_optional: false,
            legacy_default: None,
        }
    }

    pub const fn user_optional(mut self) -> Self {
        self.user_optional = true;
        self
    }

    pub const fn legacy(mut self, token: &'static str) -> Self {
        self.legacy_default = Some(token);
        self
    }

    pub fn shape(&self, revision: u16) -> AdapterShape {
        AdapterShape {
            family: self.family,
            revision,
        }
    }

    /// Finds the row for an exact token, including the latest one.
    pub fn revision_for(&self, token: &str) -> Option<&Revision> {
        self.revisions
            .iter()
            .chain(std::iter::once(&self.latest))
            .find(|row| row.token == token)
    }
}

const IPV6_SERVER: Capabilities = Capabilities::GAMESERVER_IPV6;

pub static BUILTIN_FAMILIES: &[FamilySpec] = &[
    FamilySpec::new(
        Family::Client,
        &["SteamClient"],
        &[
            rev("SteamClient007", 7),
            rev("SteamClient008", 8),
            rev("SteamClient009", 9),
            rev("SteamClient010", 10),
            rev("SteamClient011", 11),
            rev("SteamClient012", 12),
            rev("SteamClient013", 13),
            rev("SteamClient014", 14),
            rev("SteamClient015", 15),
            rev("SteamClient016", 16),
            rev("SteamClient017", 17),
            rev("SteamClient018", 18),
            rev("SteamClient019", 19),
            rev("SteamClient020", 20),
        ],
        rev_caps("SteamClient021", 21, Capabilities::CLIENT_IPV6),
        Scope::ClientOnly,
    )
    .user_optional()
    .legacy("SteamClient017"),
    FamilySpec::new(
        Family::NetworkingSocketsSerialized,
        &["SteamNetworkingSocketsSerialized"],
        &[
            rev("SteamNetworkingSocketsSerialized002", 2),
            rev("SteamNetworkingSocketsSerialized003", 3),
            rev("SteamNetworkingSocketsSerialized004", 4),
        ],
        rev("SteamNetworkingSocketsSerialized005", 5),
        Scope::PerRole,
    ),
    FamilySpec::new(
        Family::NetworkingSockets,
        &["SteamNetworkingSockets"],
        &[
            rev("SteamNetworkingSockets001", 1),
            rev("SteamNetworkingSockets002", 2),
            rev("SteamNetworkingSockets003", 3),
            rev("SteamNetworkingSockets004", 4),
            rev("SteamNetworkingSockets006", 6),
            rev("SteamNetworkingSockets008", 8),
            rev("SteamNetworkingSockets009", 9),
            rev("SteamNetworkingSockets010", 10),
            rev("SteamNetworkingSockets011", 11),
        ],
        rev("SteamNetworkingSockets012", 12),
        Scope::PerRole,
    ),
    FamilySpec::new(
        Family::NetworkingMessages,
        &["SteamNetworkingMessages"],
        &[],
        rev("SteamNetworkingMessages002", 2),
        Scope::PerRole,
    ),
    FamilySpec::new(
        Family::NetworkingUtils,
        &["SteamNetworkingUtils"],
        &[
            rev("SteamNetworkingUtils001", 1),
            rev("SteamNetworkingUtils002", 2),
            rev("SteamNetworkingUtils003", 3),
        ],
        rev("SteamNetworkingUtils004", 4),
        Scope::ClientOnly,
    )
    .user_optional(),
    FamilySpec::new(
        Family::Networking,
        &["SteamNetworking"],
        &[
            rev("SteamNetworking001", 1),
            rev("SteamNetworking002", 2),
            rev("SteamNetworking003", 3),
            rev("SteamNetworking004", 4),
            rev("SteamNetworking005", 5),
        ],
        rev("SteamNetworking006", 6),
        Scope::PerRole,
    )
    .legacy("SteamNetworking005"),
    FamilySpec::new(
        Family::GameCoordinator,
        &["SteamGameCoordinator"],
        &[],
        rev("SteamGameCoordinator001", 1),
        Scope::PerRole,
    ),
    FamilySpec::new(
        Family::Tv,
        &["STEAMTV_INTERFACE_V"],
        &[rev("STEAMTV_INTERFACE_V001", 1)],
        rev("STEAMTV_INTERFACE_V002", 2),
        Scope::ClientOnly,
    ),
    FamilySpec::new(
        Family::RemoteStorage,
        &["STEAMREMOTESTORAGE_INTERFACE_VERSION"],
        &[
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION001", 1),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION002", 2),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION003", 3),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION004", 4),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION005", 5),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION006", 6),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION007", 7),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION008", 8),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION009", 9),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION010", 10),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION011", 11),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION012", 12),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION013", 13),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION014", 14),
            rev("STEAMREMOTESTORAGE_INTERFACE_VERSION015", 15),
        ],
        rev("STEAMREMOTESTORAGE_INTERFACE_VERSION016", 16),
        Scope::ClientOnly,
    )
    .legacy("STEAMREMOTESTORAGE_INTERFACE_VERSION013"),
    FamilySpec::new(
        Family::GameServerStats,
        &["SteamGameServerStats"],
        &[],
        rev("SteamGameServerStats001", 1),
        Scope::ServerOnly,
    )
    .legacy("SteamGameServerStats001"),
    FamilySpec::new(
        Family::GameServer,
        &["SteamGameServer"],
        &[
            rev("SteamGameServer004", 4),
            rev("SteamGameServer005", 5),
            rev("SteamGameServer006", 8),
            rev("SteamGameServer007", 8),
            rev("SteamGameServer008", 8),
            rev("SteamGameServer009", 9),
            rev("SteamGameServer010", 10),
            rev("SteamGameServer011", 11),
            rev("SteamGameServer012", 12),
            rev_caps("SteamGameServer013", 13, IPV6_SERVER),
            rev_caps("SteamGameServer014", 14, IPV6_SERVER),
        ],
        rev_caps("SteamGameServer015", 15, IPV6_SERVER),
        Scope::ServerOnly,
    )
    .legacy("SteamGameServer012"),
    FamilySpec::new(
        Family::MatchmakingServers,
        &["SteamMatchMakingServers"],
        &[rev("SteamMatchMakingServers001", 1)],
        rev("SteamMatchMakingServers002", 2),
        Scope::ClientOnly,
    )
    .legacy("SteamMatchMakingServers002"),
    FamilySpec::new(
        Family::Matchmaking,
        &["SteamMatchMaking"],
        &[
            rev("SteamMatchMaking001", 2),
            rev("SteamMatchMaking002", 2),
            rev("SteamMatchMaking003", 3),
            rev("SteamMatchMaking004", 4),
            rev("SteamMatchMaking005", 5),
            rev("SteamMatchMaking006", 6),
            rev("SteamMatchMaking007", 7),
            rev("SteamMatchMaking008", 8),
        ],
        rev("SteamMatchMaking009", 9),
        Scope::ClientOnly,
    )
    .legacy("SteamMatchMaking009"),
    FamilySpec::new(
        Family::Friends,
        &["SteamFriends"],
        &[
            rev("SteamFriends003", 3),
            rev("SteamFriends004", 4),
            rev("SteamFriends005", 5),
            rev("SteamFriends006", 6),
            rev("SteamFriends007", 7),
            rev("SteamFriends008", 8),
            rev("SteamFriends009", 9),
            rev("SteamFriends010", 10),
            rev("SteamFriends011", 11),
            rev("SteamFriends012", 12),
            rev("SteamFriends013", 13),
            rev("SteamFriends014", 14),
            rev("SteamFriends015", 15),
            rev("SteamFriends016", 16),
        ],
        rev("SteamFriends017", 17),
        Scope::ClientOnly,
    )
    .legacy("SteamFriends015"),
    FamilySpec::new(
        Family::Controller,
        &["STEAMCONTROLLER_INTERFACE_VERSION", "SteamController"],
        &[
            rev("STEAMCONTROLLER_INTERFACE_VERSION", 1),
            rev("STEAMCONTROLLER_INTERFACE_VERSION_002", 2),
            rev("SteamController003", 3),
            rev("SteamController004", 4),
            rev("SteamController005", 5),
            rev("SteamController006", 6),
            rev("SteamController007", 7),
        ],
        rev("SteamController008", 8),
        Scope::ClientOnly,
    )
    .legacy("SteamController003"),
    FamilySpec::new(
        Family::Ugc,
        &["STEAMUGC_INTERFACE_VERSION"],
        &[
            rev("STEAMUGC_INTERFACE_VERSION001", 1),
            rev("STEAMUGC_INTERFACE_VERSION002", 2),
            rev("STEAMUGC_INTERFACE_VERSION003", 3),
            rev("STEAMUGC_INTERFACE_VERSION004", 4),
            rev("STEAMUGC_INTERFACE_VERSION005", 5),
            rev("STEAMUGC_INTERFACE_VERSION006", 6),
            rev("STEAMUGC_INTERFACE_VERSION007", 7),
            rev("STEAMUGC_INTERFACE_VERSION008", 8),
            rev("STEAMUGC_INTERFACE_VERSION009", 9),
            rev("STEAMUGC_INTERFACE_VERSION010", 10),
            rev("STEAMUGC_INTERFACE_VERSION011", 11),
            rev("STEAMUGC_INTERFACE_VERSION012", 12),
            rev("STEAMUGC_INTERFACE_VERSION013", 13),
            rev("STEAMUGC_INTERFACE_VERSION014", 14),
            rev("STEAMUGC_INTERFACE_VERSION015", 15),
            rev("STEAMUGC_INTERFACE_VERSION016", 16),
            rev("STEAMUGC_INTERFACE_VERSION017", 17),
        ],
        rev("STEAMUGC_INTERFACE_VERSION018", 18),
        Scope::PerRole,
    )
    .legacy("STEAMUGC_INTERFACE_VERSION007"),
    FamilySpec::new(
        Family::Inventory,
        &["STEAMINVENTORY_INTERFACE"],
        &[
            rev("STEAMINVENTORY_INTERFACE_V001", 1),
            rev("STEAMINVENTORY_INTERFACE_V002", 2),
        ],
        rev("STEAMINVENTORY_INTERFACE_V003", 3),
        Scope::PerRole,
    )
    .legacy("STEAMINVENTORY_INTERFACE_V001"),
    FamilySpec::new(
        Family::UserStats,
        &["STEAMUSERSTATS_INTERFACE_VERSION"],
        &[
            rev("STEAMUSERSTATS_INTERFACE_VERSION001", 3),
            rev("STEAMUSERSTATS_INTERFACE_VERSION002", 3),
            rev("STEAMUSERSTATS_INTERFACE_VERSION003", 3),
            rev("STEAMUSERSTATS_INTERFACE_VERSION004", 4),
            rev("STEAMUSERSTATS_INTERFACE_VERSION005", 5),
            rev("STEAMUSERSTATS_INTERFACE_VERSION006", 6),
            rev("STEAMUSERSTATS_INTERFACE_VERSION007", 7),
            rev("STEAMUSERSTATS_INTERFACE_VERSION008", 8),
            rev("STEAMUSERSTATS_INTERFACE_VERSION009", 9),
            rev("STEAMUSERSTATS_INTERFACE_VERSION010", 10),
            rev("STEAMUSERSTATS_INTERFACE_VERSION011", 11),
        ],
        rev("STEAMUSERSTATS_INTERFACE_VERSION012", 12),
        Scope::ClientOnly,
    )
    .legacy("STEAMUSERSTATS_INTERFACE_VERSION011"),
    FamilySpec::new(
        Family::User,
        &["SteamUser"],
        &[
            rev("SteamUser009", 9),
            rev("SteamUser010", 10),
            rev("SteamUser011", 11),
            rev("SteamUser012", 12),
            rev("SteamUser013", 13),
            rev("SteamUser014", 14),
            rev("SteamUser015", 15),
            rev("SteamUser016", 16),
            rev("SteamUser017", 17),
            rev("SteamUser018", 18),
            rev("SteamUser019", 19),
            rev("SteamUser020", 20),
            rev("SteamUser021", 21),
            rev("SteamUser022", 22),
        ],
        rev("SteamUser023", 23),
        Scope::ClientOnly,
    )
    .legacy("SteamUser018"),
    FamilySpec::new(
        Family::Utils,
        &["SteamUtils"],
        &[
            rev("SteamUtils002", 2),
            rev("SteamUtils003", 3),
            rev("SteamUtils004", 4),
            rev("SteamUtils005", 5),
            rev("SteamUtils006", 6),
            rev("SteamUtils007", 7),
            rev("SteamUtils008", 8),
            rev("SteamUtils009", 9),
        ],
        rev("SteamUtils010", 10),
        Scope::PerRole,
    )
    .user_optional()
    .legacy("SteamUtils007"),
    FamilySpec::new(
        Family::Apps,
        &["STEAMAPPS_INTERFACE_VERSION"],
        &[
            rev("STEAMAPPS_INTERFACE_VERSION001", 1),
            rev("STEAMAPPS_INTERFACE_VERSION002", 2),
            rev("STEAMAPPS_INTERFACE_VERSION003", 3),
            rev("STEAMAPPS_INTERFACE_VERSION004", 4),
            rev("STEAMAPPS_INTERFACE_VERSION005", 5),
            rev("STEAMAPPS_INTERFACE_VERSION006", 6),
            rev("STEAMAPPS_INTERFACE_VERSION007", 7),
        ],
        rev("STEAMAPPS_INTERFACE_VERSION008", 8),
        Scope::PerRole,
    )
    .legacy("STEAMAPPS_INTERFACE_VERSION007"),
    FamilySpec::new(
        Family::Screenshots,
        &["STEAMSCREENSHOTS_INTERFACE_VERSION"],
        &[
            rev("STEAMSCREENSHOTS_INTERFACE_VERSION001", 1),
            rev("STEAMSCREENSHOTS_INTERFACE_VERSION002", 2),
        ],
        rev("STEAMSCREENSHOTS_INTERFACE_VERSION003", 3),
        Scope::ClientOnly,
    )
    .legacy("STEAMSCREENSHOTS_INTERFACE_VERSION002"),
    FamilySpec::new(
        Family::Http,
        &["STEAMHTTP_INTERFACE_VERSION"],
        &[
            rev("STEAMHTTP_INTERFACE_VERSION001", 1),
            rev("STEAMHTTP_INTERFACE_VERSION002", 2),
        ],
        rev("STEAMHTTP_INTERFACE_VERSION003", 3),
        Scope::PerRole,
    )
    .legacy("STEAMHTTP_INTERFACE_VERSION002"),
    FamilySpec::new(
        Family::UnifiedMessages,
        &["STEAMUNIFIEDMESSAGES_INTERFACE_VERSION"],
        &[],
        rev("STEAMUNIFIEDMESSAGES_INTERFACE_VERSION001", 1),
        Scope::PerRole,
    )
    .legacy("STEAMUNIFIEDMESSAGES_INTERFACE_VERSION001"),
    FamilySpec::new(
        Family::AppList,
        &["STEAMAPPLIST_INTERFACE_VERSION"],
        &[],
        rev("STEAMAPPLIST_INTERFACE_VERSION001", 1),
        Scope::ClientOnly,
    )
    .legacy("STEAMAPPLIST_INTERFACE_VERSION001"),
    FamilySpec::new(
        Family::MusicRemote,
        &["STEAMMUSICREMOTE_INTERFACE_VERSION"],
        &[],
        rev("STEAMMUSICREMOTE_INTERFACE_VERSION001", 1),
        Scope::ClientOnly,
    )
    .legacy("STEAMMUSICREMOTE_INTERFACE_VERSION001"),
    FamilySpec::new(
        Family::Music,
        &["STEAMMUSIC_INTERFACE_VERSION"],
        &[],
        rev("STEAMMUSIC_INTERFACE_VERSION001", 1),
        Scope::ClientOnly,
    )
    .legacy("STEAMMUSIC_INTERFACE_VERSION001"),
    FamilySpec::new(
        Family::HtmlSurface,
        &["STEAMHTMLSURFACE_INTERFACE_VERSION"],
        &[
            rev("STEAMHTMLSURFACE_INTERFACE_VERSION_001", 1),
            rev("STEAMHTMLSURFACE_INTERFACE_VERSION_002", 2),
            rev("STEAMHTMLSURFACE_INTERFACE_VERSION_003", 3),
            rev("STEAMHTMLSURFACE_INTERFACE_VERSION_004", 4),
        ],
        rev("STEAMHTMLSURFACE_INTERFACE_VERSION_005", 5),
        Scope::ClientOnly,
    )
    .legacy("STEAMHTMLSURFACE_INTERFACE_VERSION_003"),
    FamilySpec::new(
        Family::Video,
        &["STEAMVIDEO_INTERFACE"],
        &[rev("STEAMVIDEO_INTERFACE_V001", 1)],
        rev("STEAMVIDEO_INTERFACE_V002", 2),
        Scope::ClientOnly,
    )
    .legacy("STEAMVIDEO_INTERFACE_V001"),
    FamilySpec::new(
        Family::MasterServerUpdater,
        &["SteamMasterServerUpdater"],
        &[],
        rev("SteamMasterServerUpdater001", 1),
        Scope::ServerOnly,
    )
    .legacy("SteamMasterServerUpdater001"),
    FamilySpec::new(
        Family::GameSearch,
        &["SteamMatchGameSearch"],
        &[],
        rev("SteamMatchGameSearch001", 1),
        Scope::ClientOnly,
    ),
    FamilySpec::new(
        Family::Parties,
        &["SteamParties"],
        &[rev("SteamParties001", 1)],
        rev("SteamParties002", 2),
        Scope::ClientOnly,
    ),
    FamilySpec::new(
        Family::Input,
        &["SteamInput"],
        &[
            rev("SteamInput001", 1),
            rev("SteamInput002", 2),
            rev("SteamInput005", 5),
        ],
        rev("SteamInput006", 6),
        Scope::ClientOnly,
    ),
    FamilySpec::new(
        Family::RemotePlay,
        &["STEAMREMOTEPLAY_INTERFACE_VERSION"],
        &[rev("STEAMREMOTEPLAY_INTERFACE_VERSION001", 1)],
        rev("STEAMREMOTEPLAY_INTERFACE_VERSION002", 2),
        Scope::ClientOnly,
    ),
    FamilySpec::new(
        Family::ParentalSettings,
        &["STEAMPARENTALSETTINGS_INTERFACE_VERSION"],
        &[],
        rev("STEAMPARENTALSETTINGS_INTERFACE_VERSION001", 1),
        Scope::ClientOnly,
    ),
    FamilySpec::new(
        Family::AppTicket,
        &["STEAMAPPTICKET_INTERFACE_VERSION"],
        &[],
        rev("STEAMAPPTICKET_INTERFACE_VERSION001", 1),
        Scope::ClientOnly,
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_only_accumulate() {
        for spec in BUILTIN_FAMILIES {
            let mut seen = Capabilities::empty();
            for row in spec.revisions.iter().chain(std::iter::once(&spec.latest)) {
                assert!(
                    row.caps.contains(seen),
                    "{} drops capabilities at {}",
                    spec.family,
                    row.token
                );
                seen = row.caps;
            }
        }
    }

    #[test]
    fn test_every_token_carries_a_family_prefix() {
        for spec in BUILTIN_FAMILIES {
            for row in spec.revisions.iter().chain(std::iter::once(&spec.latest)) {
                assert!(
                    spec.prefixes.iter().any(|prefix| row.token.starts_with(prefix)),
                    "{} is not prefixed by any {} prefix",
                    row.token,
                    spec.family
                );
            }
        }
    }

    #[test]
    fn test_legacy_defaults_are_known_tokens() {
        for spec in BUILTIN_FAMILIES {
            if let Some(token) = spec.legacy_default {
                assert!(spec.revision_for(token).is_some(), "{token}");
            }
        }
    }

    #[test]
    fn test_family_names_round_trip() {
        for spec in BUILTIN_FAMILIES {
            assert_eq!(Family::from_name(spec.family.name()), Some(spec.family));
        }
        assert_eq!(Family::from_name("steamuser"), Some(Family::User));
        assert_eq!(Family::from_name("SteamToaster"), None);
    }

    #[test]
    fn test_shape_display() {
        let shape = AdapterShape {
            family: Family::GameServer,
            revision: 8,
        };
        assert_eq!(shape.to_string(), "ISteamGameServer008");
    }
}
