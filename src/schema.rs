//! Graph schema: known kinds, property names and primary-kind selection.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::graph::Kind;

/// Active Directory kinds.
pub mod ad {
    use crate::graph::Kind;

    /// Carried by every AD node.
    pub const ENTITY: Kind = Kind::from_static("Base");
    pub const USER: Kind = Kind::from_static("User");
    pub const COMPUTER: Kind = Kind::from_static("Computer");
    pub const GROUP: Kind = Kind::from_static("Group");
    pub const GPO: Kind = Kind::from_static("GPO");
    pub const OU: Kind = Kind::from_static("OU");
    pub const CONTAINER: Kind = Kind::from_static("Container");
    pub const DOMAIN: Kind = Kind::from_static("Domain");
    pub const LOCAL_GROUP: Kind = Kind::from_static("ADLocalGroup");
    pub const LOCAL_USER: Kind = Kind::from_static("ADLocalUser");
    pub const AIACA: Kind = Kind::from_static("AIACA");
    pub const ROOT_CA: Kind = Kind::from_static("RootCA");
    pub const ENTERPRISE_CA: Kind = Kind::from_static("EnterpriseCA");
    pub const NT_AUTH_STORE: Kind = Kind::from_static("NTAuthStore");
    pub const CERT_TEMPLATE: Kind = Kind::from_static("CertTemplate");
    pub const ISSUANCE_POLICY: Kind = Kind::from_static("IssuancePolicy");

    pub const MEMBER_OF: Kind = Kind::from_static("MemberOf");
    pub const HAS_SESSION: Kind = Kind::from_static("HasSession");
    pub const ADMIN_TO: Kind = Kind::from_static("AdminTo");
    pub const CAN_RDP: Kind = Kind::from_static("CanRDP");
    pub const CAN_PS_REMOTE: Kind = Kind::from_static("CanPSRemote");
    pub const EXECUTE_DCOM: Kind = Kind::from_static("ExecuteDCOM");
    pub const ALLOWED_TO_DELEGATE: Kind = Kind::from_static("AllowedToDelegate");
    pub const GENERIC_ALL: Kind = Kind::from_static("GenericAll");
    pub const GENERIC_WRITE: Kind = Kind::from_static("GenericWrite");
    pub const OWNS: Kind = Kind::from_static("Owns");
    pub const WRITE_DACL: Kind = Kind::from_static("WriteDacl");
    pub const WRITE_OWNER: Kind = Kind::from_static("WriteOwner");
    pub const ADD_MEMBER: Kind = Kind::from_static("AddMember");
    pub const FORCE_CHANGE_PASSWORD: Kind = Kind::from_static("ForceChangePassword");
    pub const ALL_EXTENDED_RIGHTS: Kind = Kind::from_static("AllExtendedRights");
    pub const CONTAINS: Kind = Kind::from_static("Contains");
    pub const GP_LINK: Kind = Kind::from_static("GPLink");
    pub const TRUSTED_BY: Kind = Kind::from_static("TrustedBy");
    pub const DC_SYNC: Kind = Kind::from_static("DCSync");
    pub const HAS_SID_HISTORY: Kind = Kind::from_static("HasSIDHistory");

    pub const NODES: &[Kind] = &[
        ENTITY,
        USER,
        COMPUTER,
        GROUP,
        GPO,
        OU,
        CONTAINER,
        DOMAIN,
        LOCAL_GROUP,
        LOCAL_USER,
        AIACA,
        ROOT_CA,
        ENTERPRISE_CA,
        NT_AUTH_STORE,
        CERT_TEMPLATE,
        ISSUANCE_POLICY,
    ];

    pub const RELATIONSHIPS: &[Kind] = &[
        MEMBER_OF,
        HAS_SESSION,
        ADMIN_TO,
        CAN_RDP,
        CAN_PS_REMOTE,
        EXECUTE_DCOM,
        ALLOWED_TO_DELEGATE,
        GENERIC_ALL,
        GENERIC_WRITE,
        OWNS,
        WRITE_DACL,
        WRITE_OWNER,
        ADD_MEMBER,
        FORCE_CHANGE_PASSWORD,
        ALL_EXTENDED_RIGHTS,
        CONTAINS,
        GP_LINK,
        TRUSTED_BY,
        DC_SYNC,
        HAS_SID_HISTORY,
    ];
}

/// Azure kinds.
pub mod azure {
    use crate::graph::Kind;

    /// Carried by every Azure node.
    pub const ENTITY: Kind = Kind::from_static("AZBase");
    pub const APP: Kind = Kind::from_static("AZApp");
    pub const AUTOMATION_ACCOUNT: Kind = Kind::from_static("AZAutomationAccount");
    pub const CONTAINER_REGISTRY: Kind = Kind::from_static("AZContainerRegistry");
    pub const DEVICE: Kind = Kind::from_static("AZDevice");
    pub const FUNCTION_APP: Kind = Kind::from_static("AZFunctionApp");
    pub const GROUP: Kind = Kind::from_static("AZGroup");
    pub const KEY_VAULT: Kind = Kind::from_static("AZKeyVault");
    pub const LOGIC_APP: Kind = Kind::from_static("AZLogicApp");
    pub const MANAGED_CLUSTER: Kind = Kind::from_static("AZManagedCluster");
    pub const MANAGEMENT_GROUP: Kind = Kind::from_static("AZManagementGroup");
    pub const RESOURCE_GROUP: Kind = Kind::from_static("AZResourceGroup");
    pub const ROLE: Kind = Kind::from_static("AZRole");
    pub const SERVICE_PRINCIPAL: Kind = Kind::from_static("AZServicePrincipal");
    pub const SUBSCRIPTION: Kind = Kind::from_static("AZSubscription");
    pub const TENANT: Kind = Kind::from_static("AZTenant");
    pub const USER: Kind = Kind::from_static("AZUser");
    pub const VM: Kind = Kind::from_static("AZVM");
    pub const VM_SCALE_SET: Kind = Kind::from_static("AZVMScaleSet");
    pub const WEB_APP: Kind = Kind::from_static("AZWebApp");

    pub const MEMBER_OF: Kind = Kind::from_static("AZMemberOf");
    pub const CONTAINS: Kind = Kind::from_static("AZContains");
    pub const OWNS: Kind = Kind::from_static("AZOwns");
    pub const HAS_ROLE: Kind = Kind::from_static("AZHasRole");
    pub const GLOBAL_ADMIN: Kind = Kind::from_static("AZGlobalAdmin");
    pub const RUNS_AS: Kind = Kind::from_static("AZRunsAs");
    pub const EXECUTE_COMMAND: Kind = Kind::from_static("AZExecuteCommand");
    pub const CONTRIBUTOR: Kind = Kind::from_static("AZContributor");
    pub const USER_ACCESS_ADMINISTRATOR: Kind = Kind::from_static("AZUserAccessAdministrator");
    pub const ADD_MEMBERS: Kind = Kind::from_static("AZAddMembers");

    pub const NODES: &[Kind] = &[
        ENTITY,
        APP,
        AUTOMATION_ACCOUNT,
        CONTAINER_REGISTRY,
        DEVICE,
        FUNCTION_APP,
        GROUP,
        KEY_VAULT,
        LOGIC_APP,
        MANAGED_CLUSTER,
        MANAGEMENT_GROUP,
        RESOURCE_GROUP,
        ROLE,
        SERVICE_PRINCIPAL,
        SUBSCRIPTION,
        TENANT,
        USER,
        VM,
        VM_SCALE_SET,
        WEB_APP,
    ];

    pub const RELATIONSHIPS: &[Kind] = &[
        MEMBER_OF,
        CONTAINS,
        OWNS,
        HAS_ROLE,
        GLOBAL_ADMIN,
        RUNS_AS,
        EXECUTE_COMMAND,
        CONTRIBUTOR,
        USER_ACCESS_ADMINISTRATOR,
        ADD_MEMBERS,
    ];
}

/// Property names shared by every node type.
pub mod property {
    pub const OBJECT_ID: &str = "objectid";
    pub const NAME: &str = "name";
    pub const DISPLAY_NAME: &str = "displayname";
    pub const DISTINGUISHED_NAME: &str = "distinguishedname";
    pub const SYSTEM_TAGS: &str = "system_tags";
    pub const LAST_SEEN: &str = "lastseen";
    pub const DOMAIN_SID: &str = "domainsid";
    pub const TENANT_ID: &str = "tenantid";
}

pub const META: Kind = Kind::from_static("Meta");
pub const META_DETAIL: Kind = Kind::from_static("MetaDetail");

/// Display kind for nodes without a recognized kind.
pub const UNKNOWN: Kind = Kind::from_static("Unknown");

/// Display name for nodes without a name, display name or object id.
pub const DEFAULT_MISSING_NAME: &str = "NO NAME";

/// Object id reported for nodes without one.
pub const DEFAULT_MISSING_OBJECT_ID: &str = "NO OBJECT ID";

/// System tag marking tier zero assets.
pub const TIER_ZERO_TAG: &str = "admin_tier_0";

static VALID_KINDS: Lazy<HashSet<Kind>> = Lazy::new(|| {
    ad::NODES
        .iter()
        .chain(ad::RELATIONSHIPS)
        .chain(azure::NODES)
        .chain(azure::RELATIONSHIPS)
        .chain([META, META_DETAIL].iter())
        .cloned()
        .collect()
});

/// True for kinds the schema defines.
pub fn is_valid_kind(kind: &Kind) -> bool {
    VALID_KINDS.contains(kind)
}

/// Resolves a kind name against the schema.
pub fn parse_kind(name: &str) -> Option<Kind> {
    VALID_KINDS.get(&Kind::new(name)).cloned()
}

/// Picks the single kind a node is displayed as.
///
/// Meta kinds win outright. Otherwise the last schema-known kind wins, with
/// `ADLocalGroup` only used when nothing better was found. The entity base
/// kind (`Base` or `AZBase`) is the fallback before [`UNKNOWN`].
pub fn primary_kind(kinds: &[Kind]) -> Kind {
    let mut result = UNKNOWN;
    let mut base = UNKNOWN;

    for kind in kinds {
        if *kind == META || *kind == META_DETAIL {
            return META;
        } else if *kind == ad::ENTITY || *kind == azure::ENTITY {
            base = kind.clone();
        } else if *kind == ad::LOCAL_GROUP {
            if result == UNKNOWN {
                result = kind.clone();
            }
        } else if is_valid_kind(kind) {
            result = kind.clone();
        }
    }

    if result == UNKNOWN {
        base
    } else {
        result
    }
}
