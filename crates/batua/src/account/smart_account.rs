//! Passkey-owned Kernel smart accounts.
//!
//! The account address is derived with CREATE2 from the owner's WebAuthn public
//! key, so the same passkey always maps to the same account, before and after
//! deployment.

use alloy_core::sol;
use alloy_core::sol_types::{SolCall, SolValue};
use alloy_primitives::aliases::U192;
use alloy_primitives::{Address, B256, Bytes, FixedBytes, U256, address, keccak256, uint};

use super::passkey::WebAuthnAssertion;
use crate::error::ProviderError;
use crate::types::{Call, ChainId, Credential};

/// ERC-4337 EntryPoint v0.7.
pub const ENTRY_POINT_V07: Address = address!("0000000071727De22E5E9d8BAf0edAc6f37da032");

mod kernel {
    use super::sol;

    sol! {
        struct Execution {
            address target;
            uint256 value;
            bytes callData;
        }

        function initialize(
            bytes21 rootValidator,
            address hook,
            bytes validatorData,
            bytes hookData,
            bytes[] initConfig
        );

        function deployWithFactory(address factory, bytes createData, bytes32 salt);

        function getNonce(address sender, uint192 key) returns (uint256 nonce);

        function execute(bytes32 execMode, bytes executionCalldata);
    }
}

use kernel::{Execution, deployWithFactoryCall, executeCall, getNonceCall, initializeCall};

/// Order of the P-256 group.
const P256_N: U256 =
    uint!(0xFFFFFFFF00000000FFFFFFFFFFFFFFFFBCE6FAADA7179E84F3B9CAC2FC632551_U256);

/// Type marker that precedes the validator address in a Kernel validation id.
const VALIDATION_TYPE_VALIDATOR: u8 = 0x01;

const SINGLE_CALL_MODE: B256 = B256::ZERO;
const BATCH_CALL_MODE: B256 = {
    let mut mode = [0u8; 32];
    mode[0] = 0x01;
    B256::new(mode)
};

/// Creation code of the Solady ERC-1967 proxy, around the implementation address.
const ERC1967_PREFIX: [u8; 9] = [0x60, 0x3d, 0x3d, 0x81, 0x60, 0x22, 0x3d, 0x39, 0x73];
const ERC1967_SUFFIX: &[u8] = &[
    0x60, 0x09, 0x51, 0x55, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x36, 0x3d, 0x7f, 0x36,
    0x08, 0x94, 0xa1, 0x3b, 0xa1, 0xa3, 0x21, 0x06, 0x67, 0xc8, 0x28, 0x49, 0x2d, 0xb9, 0x8d,
    0xca, 0x3e, 0x20, 0x76, 0xcc, 0x37, 0x35, 0xa9, 0x20, 0xa3, 0xca, 0x50, 0x5d, 0x38, 0x2b,
    0xbc, 0x54, 0x5a, 0xf4, 0x3d, 0x60, 0x00, 0x80, 0x3e, 0x60, 0x38, 0x57, 0x3d, 0x60, 0x00,
    0xfd, 0x5b, 0x3d, 0x60, 0x00, 0xf3,
];

/// Contract addresses of one smart-account implementation release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountVersion {
    pub name: &'static str,
    /// Account factory that performs the CREATE2.
    pub factory: Address,
    /// Entry used in user operations to reach `factory`.
    pub meta_factory: Address,
    /// Logic contract behind each account proxy.
    pub implementation: Address,
    /// WebAuthn validator module installed as root validator.
    pub validator: Address,
    pub entry_point: Address,
    /// Verify P-256 signatures with the RIP-7212 precompile.
    pub use_precompile: bool,
}

/// Kernel v3.1 with the WebAuthn validator, on EntryPoint v0.7.
pub const KERNEL_V3_1: AccountVersion = AccountVersion {
    name: "kernel-0.3.1",
    factory: address!("aac5D4240AF87249B3f71BC8E4A2cae074A3E419"),
    meta_factory: address!("d703aaE79538628d27099B8c4f621bE4CCd142d5"),
    implementation: address!("BAC849bB641841b44E965fB01A4Bf5F074f84b4D"),
    validator: address!("7ab16Ff354AcB328452F1D445b3Ddee9a91e9e69"),
    entry_point: ENTRY_POINT_V07,
    use_precompile: false,
};

impl Default for AccountVersion {
    fn default() -> Self {
        KERNEL_V3_1
    }
}

impl AccountVersion {
    /// `keccak256` of the proxy creation code for this implementation.
    pub fn proxy_init_code_hash(&self) -> B256 {
        let mut code = Vec::with_capacity(ERC1967_PREFIX.len() + 20 + ERC1967_SUFFIX.len());
        code.extend_from_slice(&ERC1967_PREFIX);
        code.extend_from_slice(self.implementation.as_slice());
        code.extend_from_slice(ERC1967_SUFFIX);
        keccak256(code)
    }

    /// Validation id of the root validator: type byte followed by its address.
    pub fn root_validator(&self) -> FixedBytes<21> {
        let mut id = [0u8; 21];
        id[0] = VALIDATION_TYPE_VALIDATOR;
        id[1..].copy_from_slice(self.validator.as_slice());
        FixedBytes::new(id)
    }

    /// EntryPoint nonce key that selects the root validator.
    pub fn nonce_key(&self) -> U192 {
        // mode (1) ‖ type (1) ‖ validator (20) ‖ sequence key (2), as uint192
        let mut key = [0u8; 24];
        key[2..22].copy_from_slice(self.validator.as_slice());
        U192::from_be_slice(&key)
    }
}

/// The passkey owner as the WebAuthn validator stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WebAuthnOwner {
    pub x: U256,
    pub y: U256,
    pub authenticator_id_hash: B256,
}

impl WebAuthnOwner {
    pub fn from_credential(credential: &Credential) -> Result<Self, ProviderError> {
        let (x, y) = credential.coordinates()?;
        Ok(Self {
            x,
            y,
            authenticator_id_hash: credential.authenticator_id_hash(),
        })
    }

    /// `abi.encode((x, y), authenticatorIdHash)`, the validator's install data.
    pub fn validator_data(&self) -> Bytes {
        ((self.x, self.y), self.authenticator_id_hash)
            .abi_encode_params()
            .into()
    }
}

/// A smart account bound to its owner and implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartAccount {
    address: Address,
    owner: WebAuthnOwner,
    version: AccountVersion,
    chain_id: ChainId,
    index: B256,
}

impl SmartAccount {
    /// Derive the account owned by `credential`.
    ///
    /// Kernel deployments share addresses across chains, so `chain_id` does not
    /// affect the address; the account is still bound to it for signing.
    pub fn derive(
        credential: &Credential,
        version: &AccountVersion,
        chain_id: ChainId,
    ) -> Result<Self, ProviderError> {
        let owner = WebAuthnOwner::from_credential(credential)?;
        let mut account = Self {
            address: Address::ZERO,
            owner,
            version: *version,
            chain_id,
            index: B256::ZERO,
        };
        account.address = account.compute_address();
        Ok(account)
    }

    fn compute_address(&self) -> Address {
        let mut salt_input = self.init_data().to_vec();
        salt_input.extend_from_slice(self.index.as_slice());
        let salt = keccak256(salt_input);
        self.version
            .factory
            .create2(salt, self.version.proxy_init_code_hash())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> &WebAuthnOwner {
        &self.owner
    }

    pub fn version(&self) -> &AccountVersion {
        &self.version
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn entry_point(&self) -> Address {
        self.version.entry_point
    }

    /// Kernel `initialize` calldata installing the passkey as root validator.
    pub fn init_data(&self) -> Bytes {
        initializeCall {
            rootValidator: self.version.root_validator(),
            hook: Address::ZERO,
            validatorData: self.owner.validator_data(),
            hookData: Bytes::new(),
            initConfig: Vec::new(),
        }
        .abi_encode()
        .into()
    }

    /// Factory call that deploys this account, for `factoryData`.
    pub fn factory_data(&self) -> Bytes {
        deployWithFactoryCall {
            factory: self.version.factory,
            createData: self.init_data(),
            salt: self.index,
        }
        .abi_encode()
        .into()
    }

    /// Calldata for `getNonce` on the entry point.
    pub fn nonce_call(&self) -> Bytes {
        getNonceCall {
            sender: self.address,
            key: self.version.nonce_key(),
        }
        .abi_encode()
        .into()
    }

    /// Encode `calls` as one `execute(bytes32,bytes)` invocation.
    pub fn encode_calls(&self, calls: &[Call]) -> Bytes {
        let (mode, execution): (B256, Vec<u8>) = match calls {
            [call] => {
                let mut packed = call.to.to_vec();
                packed.extend_from_slice(&call.value_or_zero().to_be_bytes::<32>());
                packed.extend_from_slice(&call.data_or_empty());
                (SINGLE_CALL_MODE, packed)
            }
            _ => {
                let executions: Vec<Execution> = calls
                    .iter()
                    .map(|c| Execution {
                        target: c.to,
                        value: c.value_or_zero(),
                        callData: c.data_or_empty(),
                    })
                    .collect();
                (BATCH_CALL_MODE, executions.abi_encode())
            }
        };
        executeCall {
            execMode: mode,
            executionCalldata: execution.into(),
        }
        .abi_encode()
        .into()
    }

    /// A signature with the right shape for gas estimation.
    pub fn dummy_signature(&self) -> Bytes {
        let mut authenticator_data = vec![0x49u8; 32];
        authenticator_data.extend_from_slice(&[0x05, 0x00, 0x00, 0x00, 0x00]);
        let assertion = WebAuthnAssertion {
            credential_id: None,
            authenticator_data: authenticator_data.into(),
            client_data_json: format!(
                r#"{{"type":"webauthn.get","challenge":"{}","origin":"https://batua.invalid","crossOrigin":false}}"#,
                "A".repeat(43)
            ),
            r: P256_N - U256::from(1),
            s: P256_N >> 1,
        };
        self.encode_signature(&assertion)
    }

    /// Encode a WebAuthn assertion the way the validator expects it.
    pub fn encode_signature(&self, assertion: &WebAuthnAssertion) -> Bytes {
        let type_location = assertion
            .client_data_json
            .find(r#""type":"webauthn.get""#)
            .unwrap_or_default();
        // the validator rejects high-s signatures
        let s = if assertion.s > P256_N >> 1 {
            P256_N - assertion.s
        } else {
            assertion.s
        };
        (
            assertion.authenticator_data.clone(),
            assertion.client_data_json.clone(),
            U256::from(type_location),
            assertion.r,
            s,
            self.version.use_precompile,
        )
            .abi_encode_params()
            .into()
    }
}
