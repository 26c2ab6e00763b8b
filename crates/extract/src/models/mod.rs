mod info;
mod name;

pub use self::info::PackageInfo;
pub use self::name::PackageName;
