fn main() {
    #[cfg(feature = "pluto")]
    {
        println!("cargo:rustc-link-lib=iio");
        println!("cargo:rustc-link-lib=ad9361");
    }

    #[cfg(feature = "hackrf")]
    {
        println!("cargo:rustc-link-lib=hackrf");
    }
}
