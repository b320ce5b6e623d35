// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::ior::{AddressProfile, TaggedComponent, TAG_CODE_SETS};
use crate::message::ServiceContext;
use crate::protocol::{encode_encapsulation, CdrInputStream, CdrOutputStream, Endian};
use crate::service::CodeSetConfig;
use crate::{AppError, AppResult};

use super::{NegotiatedCodeSets, SUPPORTED_CHAR_SETS, SUPPORTED_WCHAR_SETS};

/// service context id of the code set context
pub const CODE_SET_SERVICE_ID: u32 = 1;

const CHAR_SET_INCOMPATIBLE_MINOR: u32 = 9501;
const WCHAR_SET_INCOMPATIBLE_MINOR: u32 = 9502;

/// Content of a `TAG_CODE_SETS` component: native sets and the sets the
/// advertiser can convert to and from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSetComponentData {
    pub native_char_set: u32,
    pub char_conversion_sets: Vec<u32>,
    pub native_wchar_set: u32,
    pub wchar_conversion_sets: Vec<u32>,
}

impl CodeSetComponentData {
    pub fn write_to(&self, out: &mut CdrOutputStream) -> AppResult<()> {
        out.write_ulong(self.native_char_set);
        out.write_ulong_sequence(&self.char_conversion_sets)?;
        out.write_ulong(self.native_wchar_set);
        out.write_ulong_sequence(&self.wchar_conversion_sets)?;
        Ok(())
    }

    pub fn read_from(input: &mut CdrInputStream) -> AppResult<CodeSetComponentData> {
        Ok(CodeSetComponentData {
            native_char_set: input.read_ulong()?,
            char_conversion_sets: input.read_ulong_sequence()?,
            native_wchar_set: input.read_ulong()?,
            wchar_conversion_sets: input.read_ulong_sequence()?,
        })
    }

    pub fn to_component(&self, endian: Endian) -> AppResult<TaggedComponent> {
        let data = encode_encapsulation(endian, |out| self.write_to(out))?;
        Ok(TaggedComponent::new(TAG_CODE_SETS, data))
    }

    pub fn from_component(component: &TaggedComponent) -> AppResult<CodeSetComponentData> {
        if component.tag != TAG_CODE_SETS {
            return Err(AppError::Internal(format!(
                "component tag {} is not a code set component",
                component.tag
            )));
        }
        let mut input = CdrInputStream::open_encapsulation(component.data.clone())?;
        CodeSetComponentData::read_from(&mut input)
    }
}

/// Code set negotiation for one process or one test.
///
/// The defaults come from configuration and are fixed the first time they
/// are used. `override_defaults` may replace them only before that.
#[derive(Debug)]
pub struct CodeSetService {
    configured: NegotiatedCodeSets,
    defaults: OnceCell<NegotiatedCodeSets>,
}

impl Default for CodeSetService {
    fn default() -> Self {
        CodeSetService::new(&CodeSetConfig::default())
    }
}

impl CodeSetService {
    pub fn new(config: &CodeSetConfig) -> CodeSetService {
        CodeSetService {
            configured: NegotiatedCodeSets::new(config.native_char_set, config.native_wchar_set),
            defaults: OnceCell::new(),
        }
    }

    fn defaults(&self) -> NegotiatedCodeSets {
        *self.defaults.get_or_init(|| self.configured)
    }

    pub fn default_char_set(&self) -> u32 {
        self.defaults().char_set
    }

    pub fn default_wchar_set(&self) -> u32 {
        self.defaults().wchar_set
    }

    pub fn default_code_sets(&self) -> NegotiatedCodeSets {
        self.defaults()
    }

    /// Replaces the default sets. Fails with `BadInvOrder` once the defaults
    /// have been read or set.
    pub fn override_defaults(&self, char_set: u32, wchar_set: u32) -> AppResult<()> {
        if !Self::is_char_set_supported(char_set) {
            return Err(AppError::BadParam(format!(
                "unsupported default char set {:#010x}",
                char_set
            )));
        }
        if !Self::is_wchar_set_supported(wchar_set) {
            return Err(AppError::BadParam(format!(
                "unsupported default wchar set {:#010x}",
                wchar_set
            )));
        }
        self.defaults
            .set(NegotiatedCodeSets::new(char_set, wchar_set))
            .map_err(|_| AppError::BadInvOrder)
    }

    pub fn is_char_set_supported(char_set: u32) -> bool {
        SUPPORTED_CHAR_SETS.contains(&char_set)
    }

    pub fn is_wchar_set_supported(wchar_set: u32) -> bool {
        SUPPORTED_WCHAR_SETS.contains(&wchar_set)
    }

    pub fn choose_char_set(&self, component: &CodeSetComponentData) -> AppResult<u32> {
        choose(
            component.native_char_set,
            &component.char_conversion_sets,
            self.default_char_set(),
            Self::is_char_set_supported,
        )
        .ok_or_else(|| {
            AppError::IncompatibleCodeSet(format!(
                "minor {}: no usable char set, server native {:#010x}, conversions {:x?}",
                CHAR_SET_INCOMPATIBLE_MINOR,
                component.native_char_set,
                component.char_conversion_sets
            ))
        })
    }

    pub fn choose_wchar_set(&self, component: &CodeSetComponentData) -> AppResult<u32> {
        choose(
            component.native_wchar_set,
            &component.wchar_conversion_sets,
            self.default_wchar_set(),
            Self::is_wchar_set_supported,
        )
        .ok_or_else(|| {
            AppError::IncompatibleCodeSet(format!(
                "minor {}: no usable wchar set, server native {:#010x}, conversions {:x?}",
                WCHAR_SET_INCOMPATIBLE_MINOR,
                component.native_wchar_set,
                component.wchar_conversion_sets
            ))
        })
    }

    /// Code sets for a connection to a server that advertised `component`.
    /// Without a component the defaults apply.
    pub fn negotiate(
        &self,
        component: Option<&CodeSetComponentData>,
    ) -> AppResult<NegotiatedCodeSets> {
        let chosen = match component {
            Some(component) => NegotiatedCodeSets::new(
                self.choose_char_set(component)?,
                self.choose_wchar_set(component)?,
            ),
            None => self.defaults(),
        };
        debug!(
            "negotiated char set {:#010x}, wchar set {:#010x}",
            chosen.char_set, chosen.wchar_set
        );
        Ok(chosen)
    }

    /// Server side check of the sets a client put into its service context.
    pub fn check_code_set_compatible(char_set: u32, wchar_set: u32) -> AppResult<()> {
        if !Self::is_char_set_supported(char_set) {
            warn!("client selected unsupported char set {:#010x}", char_set);
            return Err(AppError::IncompatibleCodeSet(format!(
                "minor {}: char set {:#010x}",
                CHAR_SET_INCOMPATIBLE_MINOR, char_set
            )));
        }
        if !Self::is_wchar_set_supported(wchar_set) {
            warn!("client selected unsupported wchar set {:#010x}", wchar_set);
            return Err(AppError::IncompatibleCodeSet(format!(
                "minor {}: wchar set {:#010x}",
                WCHAR_SET_INCOMPATIBLE_MINOR, wchar_set
            )));
        }
        Ok(())
    }

    /// The component this process puts into the profiles it publishes:
    /// default sets as native, every supported set as conversion set.
    pub fn create_default_codeset_component(&self) -> AppResult<TaggedComponent> {
        let defaults = self.defaults();
        CodeSetComponentData {
            native_char_set: defaults.char_set,
            char_conversion_sets: SUPPORTED_CHAR_SETS.to_vec(),
            native_wchar_set: defaults.wchar_set,
            wchar_conversion_sets: SUPPORTED_WCHAR_SETS.to_vec(),
        }
        .to_component(Endian::native())
    }

    pub fn find_code_set_component(
        profile: &AddressProfile,
    ) -> AppResult<Option<CodeSetComponentData>> {
        profile
            .find_component(TAG_CODE_SETS)
            .map(CodeSetComponentData::from_component)
            .transpose()
    }

    pub fn create_service_context(code_sets: NegotiatedCodeSets) -> AppResult<ServiceContext> {
        let data = encode_encapsulation(Endian::native(), |out| {
            out.write_ulong(code_sets.char_set);
            out.write_ulong(code_sets.wchar_set);
            Ok(())
        })?;
        Ok(ServiceContext::new(CODE_SET_SERVICE_ID, data))
    }

    pub fn find_code_set_service_context(
        contexts: &[ServiceContext],
    ) -> AppResult<Option<NegotiatedCodeSets>> {
        let Some(context) = contexts.iter().find(|c| c.context_id == CODE_SET_SERVICE_ID) else {
            return Ok(None);
        };
        let mut input = CdrInputStream::open_encapsulation(context.context_data.clone())?;
        let char_set = input.read_ulong()?;
        let wchar_set = input.read_ulong()?;
        Ok(Some(NegotiatedCodeSets::new(char_set, wchar_set)))
    }
}

fn choose(
    native: u32,
    conversions: &[u32],
    local_default: u32,
    supported: fn(u32) -> bool,
) -> Option<u32> {
    if native == local_default || supported(native) {
        return Some(native);
    }
    conversions
        .iter()
        .copied()
        .find(|set| *set == local_default)
        .or_else(|| conversions.iter().copied().find(|set| supported(*set)))
}
