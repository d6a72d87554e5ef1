pub mod metlink;
