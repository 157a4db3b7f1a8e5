//! Android target architectures and their ABI names.

use std::fmt;

/// Target architecture of a native library or assembly store partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetArch {
    /// 32-bit ARM (`armeabi-v7a`)
    Arm,
    /// 64-bit ARM (`arm64-v8a`)
    Arm64,
    /// 32-bit Intel (`x86`)
    X86,
    /// 64-bit Intel (`x86_64`)
    X86_64,
}

impl TargetArch {
    /// All architectures, in the order the Android build emits them.
    pub const ALL: [TargetArch; 4] = [Self::Arm64, Self::Arm, Self::X86_64, Self::X86];

    /// Maps an Android ABI name to its architecture.
    pub fn from_abi(abi: &str) -> Option<Self> {
        match abi {
            "armeabi-v7a" => Some(Self::Arm),
            "arm64-v8a" => Some(Self::Arm64),
            "x86" => Some(Self::X86),
            "x86_64" => Some(Self::X86_64),
            _ => None,
        }
    }

    /// Maps a .NET runtime identifier (`android-arm64`, ...) to its architecture.
    pub fn from_rid(rid: &str) -> Option<Self> {
        match rid {
            "android-arm" => Some(Self::Arm),
            "android-arm64" => Some(Self::Arm64),
            "android-x86" => Some(Self::X86),
            "android-x64" => Some(Self::X86_64),
            _ => None,
        }
    }

    /// Android ABI directory name
    pub fn abi(self) -> &'static str {
        match self {
            Self::Arm => "armeabi-v7a",
            Self::Arm64 => "arm64-v8a",
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
        }
    }

    /// Whether this is a 64-bit architecture
    pub fn is_64bit(self) -> bool {
        matches!(self, Self::Arm64 | Self::X86_64)
    }

    /// Maps an assembly store ABI tag (bits 16..24 of the store version) to its architecture.
    pub fn from_store_tag(tag: u32) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Arm64),
            0x02 => Some(Self::Arm),
            0x03 => Some(Self::X86_64),
            0x04 => Some(Self::X86),
            _ => None,
        }
    }

    /// Assembly store ABI tag
    pub fn store_tag(self) -> u32 {
        match self {
            Self::Arm64 => 0x01,
            Self::Arm => 0x02,
            Self::X86_64 => 0x03,
            Self::X86 => 0x04,
        }
    }

    /// Maps an ELF `e_machine` value to its architecture.
    pub fn from_elf_machine(machine: u16) -> Option<Self> {
        match machine {
            3 => Some(Self::X86),
            40 => Some(Self::Arm),
            62 => Some(Self::X86_64),
            183 => Some(Self::Arm64),
            _ => None,
        }
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abi())
    }
}
